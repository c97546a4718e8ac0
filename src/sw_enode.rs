//! Enode identifiers
//!
//! Every robot is addressed as `enode://<key>@127.0.0.1:<port>`. The key is
//! derived from the robot id with Blake3 and the port is `BASE_PORT + id`, so
//! the id can be recovered from the string and checked against the key.

use crate::sw_interface::{Enode, NodeError, RobotId};

pub const BASE_PORT: u32 = 1233;
pub const LOCAL_IP: &str = "127.0.0.1";

const KEY_BYTES: usize = 16;

fn node_key(id: RobotId) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"robot-");
    hasher.update(&id.to_le_bytes());
    let hash = hasher.finalize();
    hash.to_hex().as_str()[..KEY_BYTES * 2].to_string()
}

fn port(id: RobotId) -> u64 {
    u64::from(BASE_PORT) + u64::from(id)
}

/// Enode of the robot with the given id
pub fn gen_enode(id: RobotId) -> Enode {
    format!("enode://{}@{}:{}", node_key(id), LOCAL_IP, port(id))
}

/// Recover the robot id from an enode produced by [`gen_enode`]
pub fn enode_to_id(enode: &str) -> Result<RobotId, NodeError> {
    let malformed = || NodeError::MalformedEnode(enode.to_string());

    let rest = enode.strip_prefix("enode://").ok_or_else(malformed)?;
    let (key, address) = rest.split_once('@').ok_or_else(malformed)?;
    let (ip, port) = address.rsplit_once(':').ok_or_else(malformed)?;

    if ip != LOCAL_IP {
        return Err(malformed());
    }

    let port: u64 = port.parse().map_err(|_| malformed())?;
    let id = port
        .checked_sub(u64::from(BASE_PORT))
        .and_then(|id| RobotId::try_from(id).ok())
        .ok_or_else(malformed)?;

    if key != node_key(id) {
        return Err(malformed());
    }

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_roundtrip_over_population() {
        let enodes: HashSet<Enode> = (1..=50).map(gen_enode).collect();
        assert_eq!(enodes.len(), 50);

        for id in 1..=50 {
            assert_eq!(enode_to_id(&gen_enode(id)), Ok(id));
        }
    }

    #[test]
    fn test_stable_for_run() {
        assert_eq!(gen_enode(7), gen_enode(7));
        assert!(gen_enode(7).ends_with(":1240"));
    }

    #[test]
    fn test_rejects_foreign_strings() {
        assert!(enode_to_id("not an enode").is_err());
        assert!(enode_to_id("enode://abc@127.0.0.1:1234").is_err());
        assert!(enode_to_id("enode://abc@10.0.0.1:1234").is_err());

        // key of robot 1 on the port of robot 2
        let forged = gen_enode(1).replace(":1234", ":1235");
        assert!(enode_to_id(&forged).is_err());
    }

    #[test]
    fn test_largest_id_keeps_its_port() {
        let enode = gen_enode(RobotId::MAX);
        assert!(enode.ends_with(&format!(":{}", u64::from(RobotId::MAX) + 1233)));
        assert_eq!(enode_to_id(&enode), Ok(RobotId::MAX));

        // one past the id range
        let past = enode.replace(
            &format!(":{}", u64::from(RobotId::MAX) + 1233),
            &format!(":{}", u64::from(RobotId::MAX) + 1234),
        );
        assert!(enode_to_id(&past).is_err());
    }
}
