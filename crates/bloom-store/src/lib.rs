mod memory;
mod sqlite;

pub use memory::{MemoryUserStore, DEFAULT_MAX_HISTORY};
pub use sqlite::SqliteUserStore;

use async_trait::async_trait;
use bloom_common::{Interaction, Result, UserProfile};

/// Persistence for user profiles and question history.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert or replace the profile for `user_id`.
    async fn save_profile(&self, user_id: &str, profile: UserProfile) -> Result<()>;

    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>>;

    async fn record_interaction(&self, interaction: Interaction) -> Result<()>;

    /// The newest `limit` interactions, oldest first.
    async fn recent_interactions(&self, user_id: &str, limit: usize) -> Result<Vec<Interaction>>;

    /// Forget a user's history. Returns how many interactions were removed.
    async fn clear_history(&self, user_id: &str) -> Result<usize>;
}
