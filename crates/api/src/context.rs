use skillpath_core::Identity;

/// Authenticated caller for a request.
///
/// Inserted by the bearer auth middleware; every `/api/roadmaps` handler
/// derives its owner key from this and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityContext {
    identity: Identity,
}

impl IdentityContext {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}
