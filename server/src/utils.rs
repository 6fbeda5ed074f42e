use rand::Rng;

const NAME_PREFIX_LEN: usize = 6;

// Random 128-bit identifier rendered as lowercase hex
pub fn generate_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// Short readable name derived from a session id
pub fn display_name(id: &str) -> String {
    let prefix: String = id.chars().take(NAME_PREFIX_LEN).collect();
    format!("Player-{}", prefix)
}
