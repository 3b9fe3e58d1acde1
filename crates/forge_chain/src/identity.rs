//! Loading the signing identity from the environment or a keypair file.
//!
//! Two encodings are accepted everywhere: the Solana CLI JSON byte array
//! (`[12,34,...]`, 64 bytes) and a base58 string of the same 64 bytes.

use std::io::Write;
use std::path::Path;

use solana_sdk::signature::{Keypair, Signer};
use tracing::{info, warn};

use crate::error::LedgerError;

const KEYPAIR_LEN: usize = 64;

/// Load the keypair stored in environment variable `name`.
pub fn load_keypair(name: &str) -> Result<Keypair, LedgerError> {
    load_keypair_with(name, |key| std::env::var(key).ok())
}

/// Load the keypair stored under `name`, reading variables through `lookup`.
pub fn load_keypair_with<F>(name: &str, lookup: F) -> Result<Keypair, LedgerError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| LedgerError::missing_secret(name, "environment variable is not set"))?;
    let keypair = parse_keypair(&raw).map_err(|reason| LedgerError::missing_secret(name, reason))?;
    info!(pubkey = %keypair.pubkey(), "Loaded keypair from {name}");
    Ok(keypair)
}

/// Load a Solana CLI keypair file (JSON byte array).
pub fn load_keypair_file(path: &Path) -> Result<Keypair, LedgerError> {
    let name = path.display().to_string();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| LedgerError::missing_secret(&name, format!("cannot read file: {e}")))?;
    let keypair = parse_keypair(&raw).map_err(|reason| LedgerError::missing_secret(&name, reason))?;
    info!(pubkey = %keypair.pubkey(), "Loaded keypair from {name}");
    Ok(keypair)
}

/// Load the keypair from `name`, or generate one and append it to `env_file`
/// when the variable is unset.
pub fn load_or_generate_keypair(name: &str, env_file: &Path) -> Result<Keypair, LedgerError> {
    load_or_generate_with(name, env_file, |key| std::env::var(key).ok())
}

pub fn load_or_generate_with<F>(
    name: &str,
    env_file: &Path,
    lookup: F,
) -> Result<Keypair, LedgerError>
where
    F: Fn(&str) -> Option<String>,
{
    if lookup(name).is_some_and(|v| !v.trim().is_empty()) {
        return load_keypair_with(name, lookup);
    }

    let keypair = Keypair::new();
    let line = format!("{name}={}\n", encode_keypair_json(&keypair));
    let write_err = |e: std::io::Error| {
        LedgerError::missing_secret(name, format!("cannot write {}: {e}", env_file.display()))
    };
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(env_file)
        .map_err(write_err)?;
    file.write_all(line.as_bytes()).map_err(write_err)?;

    // Restrict file permissions to owner-only on Unix (0o600 = rw-------).
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(env_file, std::fs::Permissions::from_mode(0o600))
            .map_err(write_err)?;
    }

    warn!(
        pubkey = %keypair.pubkey(),
        "{name} was not set; generated a new keypair and saved it to {}",
        env_file.display()
    );
    Ok(keypair)
}

/// Decode either encoding into a keypair.
pub fn parse_keypair(raw: &str) -> Result<Keypair, String> {
    let raw = raw.trim();
    let bytes: Vec<u8> = if raw.starts_with('[') {
        serde_json::from_str(raw).map_err(|e| format!("invalid JSON byte array: {e}"))?
    } else {
        bs58::decode(raw)
            .into_vec()
            .map_err(|e| format!("invalid base58: {e}"))?
    };
    if bytes.len() != KEYPAIR_LEN {
        return Err(format!(
            "expected {KEYPAIR_LEN} bytes of key material, got {}",
            bytes.len()
        ));
    }
    Keypair::from_bytes(&bytes).map_err(|e| format!("invalid keypair bytes: {e}"))
}

/// JSON byte-array encoding, as written by `solana-keygen`.
pub fn encode_keypair_json(keypair: &Keypair) -> String {
    let bytes = keypair.to_bytes();
    let parts: Vec<String> = bytes.iter().map(u8::to_string).collect();
    format!("[{}]", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(map: HashMap<String, String>) -> impl Fn(&str) -> Option<String> {
        move |k| map.get(k).cloned()
    }

    #[test]
    fn loads_json_byte_array() {
        let keypair = Keypair::new();
        let vars = HashMap::from([("SECRET_KEY".to_string(), encode_keypair_json(&keypair))]);
        let loaded = load_keypair_with("SECRET_KEY", lookup_from(vars)).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn loads_base58_string() {
        let keypair = Keypair::new();
        let encoded = bs58::encode(keypair.to_bytes()).into_string();
        let vars = HashMap::from([("SECRET_KEY".to_string(), encoded)]);
        let loaded = load_keypair_with("SECRET_KEY", lookup_from(vars)).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn missing_variable_is_missing_secret() {
        let err = load_keypair_with("SECRET_KEY", |_| None).unwrap_err();
        assert!(matches!(err, LedgerError::MissingSecret { ref name, .. } if name == "SECRET_KEY"));
    }

    #[test]
    fn malformed_variable_is_missing_secret() {
        let vars = HashMap::from([("SECRET_KEY".to_string(), "[1,2,3]".to_string())]);
        let err = load_keypair_with("SECRET_KEY", lookup_from(vars)).unwrap_err();
        match err {
            LedgerError::MissingSecret { reason, .. } => assert!(reason.contains("64 bytes")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn loads_keypair_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("id.json");
        let keypair = Keypair::new();
        std::fs::write(&path, encode_keypair_json(&keypair)).unwrap();

        let loaded = load_keypair_file(&path).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
        assert!(load_keypair_file(&tmp.path().join("absent.json")).is_err());
    }

    #[test]
    fn generates_and_persists_when_unset() {
        let tmp = tempfile::tempdir().unwrap();
        let env_file = tmp.path().join(".env");
        std::fs::write(&env_file, "OTHER=1\n").unwrap();

        let generated = load_or_generate_with("SECRET_KEY", &env_file, |_| None).unwrap();

        let contents = std::fs::read_to_string(&env_file).unwrap();
        assert!(contents.starts_with("OTHER=1\n"));
        let line = contents
            .lines()
            .find_map(|l| l.strip_prefix("SECRET_KEY="))
            .unwrap();
        assert_eq!(parse_keypair(line).unwrap().pubkey(), generated.pubkey());
    }

    #[test]
    fn existing_variable_is_not_regenerated() {
        let tmp = tempfile::tempdir().unwrap();
        let env_file = tmp.path().join(".env");
        let keypair = Keypair::new();
        let vars = HashMap::from([("SECRET_KEY".to_string(), encode_keypair_json(&keypair))]);

        let loaded = load_or_generate_with("SECRET_KEY", &env_file, lookup_from(vars)).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
        assert!(!env_file.exists());
    }
}
