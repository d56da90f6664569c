use russh::client::Handler;
use russh::keys::{HashAlg, PublicKey, PublicKeyBase64};
use tracing::{debug, warn};

pub(crate) struct HostKeyCheck {
    /// OpenSSH SHA256 fingerprints or base64 public keys. Empty accepts any key.
    pub allowed_fingerprints: Vec<String>,
}

impl Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let fp_sha256 = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        if self.allowed_fingerprints.is_empty() {
            debug!("accepting server key {fp_sha256} (no allow-list configured)");
            return Ok(true);
        }
        let key_b64 = server_public_key.public_key_base64();
        let ok = self
            .allowed_fingerprints
            .iter()
            .any(|s| s == &fp_sha256 || s == &key_b64);
        if !ok {
            warn!("rejecting server key {fp_sha256}: not in the allow-list");
        }
        Ok(ok)
    }
}
