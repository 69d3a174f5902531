//! Local mirror of credentials this minter has issued.

use dashmap::DashMap;

use super::credential::{Credential, CredentialId};
use crate::identity::Address;

#[derive(Debug, Default)]
pub struct CredentialBook {
    credentials: DashMap<CredentialId, Credential>,
}

impl CredentialBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, credential: Credential) {
        self.credentials.insert(credential.id, credential);
    }

    pub fn get(&self, id: &CredentialId) -> Option<Credential> {
        self.credentials.get(id).map(|c| c.clone())
    }

    /// Credentials owned by `owner`, oldest first.
    pub fn by_owner(&self, owner: &Address) -> Vec<Credential> {
        let mut owned: Vec<Credential> = self
            .credentials
            .iter()
            .filter(|c| c.owner == *owner)
            .map(|c| c.clone())
            .collect();
        owned.sort_by_key(|c| c.id);
        owned
    }

    /// Returns `false` if the credential is unknown here.
    pub fn mark_revoked(&self, id: &CredentialId) -> bool {
        match self.credentials.get_mut(id) {
            Some(mut c) => {
                c.revoked = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}
