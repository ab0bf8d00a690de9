use crate::UserStore;
use async_trait::async_trait;
use bloom_common::{Interaction, Result, UserProfile};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

pub const DEFAULT_MAX_HISTORY: usize = 50;

#[derive(Default)]
struct UserRecord {
    profile: Option<UserProfile>,
    history: VecDeque<Interaction>,
}

/// Process-local store. Each user's history is capped, dropping the oldest entries.
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
    max_history_per_user: usize,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_MAX_HISTORY)
    }

    pub fn with_history_limit(max_history_per_user: usize) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            max_history_per_user: max_history_per_user.max(1),
        }
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn save_profile(&self, user_id: &str, profile: UserProfile) -> Result<()> {
        let mut users = self.users.write().await;
        users.entry(user_id.to_string()).or_default().profile = Some(profile);
        Ok(())
    }

    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let users = self.users.read().await;
        Ok(users.get(user_id).and_then(|u| u.profile.clone()))
    }

    async fn record_interaction(&self, interaction: Interaction) -> Result<()> {
        let mut users = self.users.write().await;
        let record = users.entry(interaction.user_id.clone()).or_default();
        record.history.push_back(interaction);

        while record.history.len() > self.max_history_per_user {
            record.history.pop_front();
        }
        debug!("History size now {}", record.history.len());
        Ok(())
    }

    async fn recent_interactions(&self, user_id: &str, limit: usize) -> Result<Vec<Interaction>> {
        let users = self.users.read().await;
        let Some(record) = users.get(user_id) else {
            return Ok(Vec::new());
        };

        let skip = record.history.len().saturating_sub(limit);
        Ok(record.history.iter().skip(skip).cloned().collect())
    }

    async fn clear_history(&self, user_id: &str) -> Result<usize> {
        let mut users = self.users.write().await;
        Ok(users
            .get_mut(user_id)
            .map(|record| {
                let removed = record.history.len();
                record.history.clear();
                removed
            })
            .unwrap_or(0))
    }
}
