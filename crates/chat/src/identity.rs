use std::sync::Arc;

use arc_swap::ArcSwapOption;

use pesu_storage::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: UserId,
    pub email: String,
}

/// Boundary to whatever authentication host embeds the core. The engine only
/// reads the id; absence forces an unauthenticated empty state.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthenticatedUser>;
    fn sign_out(&self);
}

/// Identity provider backed by a swappable in-memory slot, for hosts that
/// push session changes in and for tests.
#[derive(Default)]
pub struct SwapIdentity {
    user: ArcSwapOption<AuthenticatedUser>,
}

impl SwapIdentity {
    pub fn signed_in(user: AuthenticatedUser) -> Self {
        Self {
            user: ArcSwapOption::new(Some(Arc::new(user))),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: AuthenticatedUser) {
        self.user.store(Some(Arc::new(user)));
    }
}

impl IdentityProvider for SwapIdentity {
    fn current_user(&self) -> Option<AuthenticatedUser> {
        self.user.load_full().map(|user| (*user).clone())
    }

    fn sign_out(&self) {
        self.user.store(None);
        tracing::debug!("user signed out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> AuthenticatedUser {
        AuthenticatedUser {
            id: UserId::new_v7(),
            email: "someone@example.test".to_string(),
        }
    }

    #[test]
    fn signed_in_provider_exposes_the_user() {
        let user = sample_user();
        let identity = SwapIdentity::signed_in(user.clone());
        assert_eq!(identity.current_user(), Some(user));
    }

    #[test]
    fn sign_out_clears_the_session() {
        let identity = SwapIdentity::signed_in(sample_user());
        identity.sign_out();
        assert_eq!(identity.current_user(), None);
    }

    #[test]
    fn sign_in_replaces_the_previous_user() {
        let identity = SwapIdentity::signed_out();
        assert_eq!(identity.current_user(), None);

        let replacement = sample_user();
        identity.sign_in(replacement.clone());
        assert_eq!(identity.current_user(), Some(replacement));
    }
}
