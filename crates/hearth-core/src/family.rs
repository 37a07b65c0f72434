use crate::error::CoreError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Identity/Family provider collaborator.
///
/// Supplies family membership as read-only input; the core never mutates
/// it. Membership changes observed by the app should be answered with a
/// cache invalidation for the affected users.
#[async_trait]
pub trait FamilyProvider: Send + Sync {
    async fn current_family_id(&self, user_id: &str) -> Result<Option<String>, CoreError>;

    async fn member_ids(&self, family_id: &str) -> Result<Vec<String>, CoreError>;
}

/// Fixed membership table for tests and local single-device mode.
#[derive(Debug, Default)]
pub struct StaticFamilyProvider {
    families: HashMap<String, Vec<String>>,
}

impl StaticFamilyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_family(mut self, family_id: &str, members: Vec<String>) -> Self {
        self.families.insert(family_id.to_string(), members);
        self
    }
}

#[async_trait]
impl FamilyProvider for StaticFamilyProvider {
    async fn current_family_id(&self, user_id: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .families
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == user_id))
            .map(|(family_id, _)| family_id.clone()))
    }

    async fn member_ids(&self, family_id: &str) -> Result<Vec<String>, CoreError> {
        Ok(self.families.get(family_id).cloned().unwrap_or_default())
    }
}
