//! Macros for the depot API.

/// Implement `FromRef<AppState>` for one field, so handlers can extract the
/// piece of state they need.
///
/// ```ignore
/// impl_from_ref!(Arc<HealthChecker>, health);
/// // Expands to:
/// impl axum::extract::FromRef<AppState> for Arc<HealthChecker> {
///     fn from_ref(state: &AppState) -> Self {
///         state.health.clone()
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<$crate::state::AppState> for $type {
            fn from_ref(state: &$crate::state::AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}
