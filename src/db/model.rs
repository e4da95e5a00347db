//! Database entity models used by repositories.

use uuid::Uuid;

use crate::model::ChannelConfig;

/// Persisted tenant connection to the upstream PIM. The append-only sync
/// ledger lives in its own table and is queried separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub tenant_id: Uuid,
    pub pim_url: String,
    pub username: String,
    pub password: String,
    /// Base64-encoded `client_id:client_secret` for the PIM token endpoint.
    pub client_secret: String,
    pub provider_client_id: String,
    pub is_alive: bool,
    pub is_synchronizing: bool,
    pub channel: ChannelConfig,
}

/// Serialized workflow input of a live orchestration instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub instance_id: String,
    pub workflow: String,
    pub state: String,
}
