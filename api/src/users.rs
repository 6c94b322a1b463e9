use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use vault::EncryptedCredential;

/// A registered developer. The upstream token is only ever held encrypted.
#[derive(Clone, Debug, PartialEq)]
pub struct UserRecord {
    pub user_name: String,
    pub email: Option<String>,
    pub encrypted_credential: Option<EncryptedCredential>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find(&self, user_name: &str) -> Option<UserRecord>;

    /// Creates the user if missing and replaces its stored credential.
    async fn upsert_credential(
        &self,
        user_name: &str,
        email: Option<String>,
        credential: EncryptedCredential,
    ) -> UserRecord;
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find(&self, user_name: &str) -> Option<UserRecord> {
        self.users.read().get(user_name).cloned()
    }

    async fn upsert_credential(
        &self,
        user_name: &str,
        email: Option<String>,
        credential: EncryptedCredential,
    ) -> UserRecord {
        let mut users = self.users.write();
        let record = users
            .entry(user_name.to_string())
            .or_insert_with(|| UserRecord {
                user_name: user_name.to_string(),
                email: None,
                encrypted_credential: None,
            });

        if email.is_some() {
            record.email = email;
        }
        record.encrypted_credential = Some(credential);
        record.clone()
    }
}
