use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use uuid::Uuid;

pub const KEY_DEV_DEVICE_ID: &str = "telemetry.devDeviceId";
pub const KEY_MACHINE_ID: &str = "telemetry.machineId";
pub const KEY_MAC_MACHINE_ID: &str = "telemetry.macMachineId";
pub const KEY_SQM_ID: &str = "telemetry.sqmId";
pub const KEY_SERVICE_MACHINE_ID: &str = "storage.serviceMachineId";

/// One freshly generated set of identifiers, committed to every store as a
/// unit. `service_machine_id` deliberately aliases `dev_device_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySet {
    pub dev_device_id: String,
    pub machine_id: String,
    pub mac_machine_id: String,
    pub sqm_id: String,
    pub service_machine_id: String,
}

impl IdentitySet {
    /// Draws fresh entropy from the OS CSPRNG on every call. Identifiers are
    /// meant to defeat duplicate-install detection, so a general-purpose PRNG
    /// would be the wrong source.
    pub fn generate() -> IdentitySet {
        let dev_device_id = Uuid::new_v4().to_string();

        let mut seed256 = [0u8; 32];
        OsRng.fill_bytes(&mut seed256);
        let machine_id = format!("{:x}", Sha256::digest(seed256));

        let mut seed512 = [0u8; 64];
        OsRng.fill_bytes(&mut seed512);
        let mac_machine_id = format!("{:x}", Sha512::digest(seed512));

        let sqm_id = format!("{{{}}}", Uuid::new_v4().to_string().to_uppercase());

        IdentitySet {
            service_machine_id: dev_device_id.clone(),
            dev_device_id,
            machine_id,
            mac_machine_id,
            sqm_id,
        }
    }

    /// Store entries in the order they are written.
    pub fn entries(&self) -> [(&'static str, &str); 5] {
        [
            (KEY_DEV_DEVICE_ID, &self.dev_device_id),
            (KEY_MACHINE_ID, &self.machine_id),
            (KEY_MAC_MACHINE_ID, &self.mac_machine_id),
            (KEY_SQM_ID, &self.sqm_id),
            (KEY_SERVICE_MACHINE_ID, &self.service_machine_id),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_lower_hex(s: &str) -> bool {
        s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    #[test]
    fn service_machine_id_aliases_dev_device_id() {
        let ids = IdentitySet::generate();
        assert_eq!(ids.service_machine_id, ids.dev_device_id);
    }

    #[test]
    fn machine_id_is_64_lower_hex() {
        let ids = IdentitySet::generate();
        assert_eq!(ids.machine_id.len(), 64);
        assert!(is_lower_hex(&ids.machine_id));
    }

    #[test]
    fn mac_machine_id_is_128_lower_hex() {
        let ids = IdentitySet::generate();
        assert_eq!(ids.mac_machine_id.len(), 128);
        assert!(is_lower_hex(&ids.mac_machine_id));
    }

    #[test]
    fn sqm_id_is_braced_uppercase_uuid() {
        let ids = IdentitySet::generate();
        assert!(ids.sqm_id.starts_with('{') && ids.sqm_id.ends_with('}'));
        let inner = &ids.sqm_id[1..ids.sqm_id.len() - 1];
        assert_eq!(inner, inner.to_uppercase());
        assert!(Uuid::parse_str(inner).is_ok());
    }

    #[test]
    fn dev_device_id_parses_as_uuid() {
        let ids = IdentitySet::generate();
        let parsed = Uuid::parse_str(&ids.dev_device_id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn successive_calls_draw_fresh_entropy() {
        let a = IdentitySet::generate();
        let b = IdentitySet::generate();
        assert_ne!(a.dev_device_id, b.dev_device_id);
        assert_ne!(a.machine_id, b.machine_id);
    }
}
