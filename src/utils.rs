use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Prefixes the ICE server URL with a scheme derived from its type when missing
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if ["stun:", "stuns:", "turn:", "turns:"]
        .iter()
        .any(|scheme| config.url.starts_with(scheme))
    {
        config.url.clone()
    } else {
        let scheme = if config.is_turn() { "turn:" } else { "stun:" };
        format!("{}{}", scheme, config.url)
    }
}
