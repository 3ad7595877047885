use podquorum::{generate_id, Config, ConfigBuilder, MembershipStore, NodeRecord, NodeRole};
use std::fs;
use tempfile::TempDir;

use crate::constant::{APP_LABEL, PEER_PORT};

/// Config with short timeouts, pointing at `data_dir`.
pub fn test_config(data_dir: &TempDir) -> Config {
    ConfigBuilder::new()
        .data_dir(data_dir.path().to_string_lossy().into_owned())
        .peer_port(PEER_PORT)
        .label_key("app".to_owned())
        .label_value(APP_LABEL.to_owned())
        .watch_interval(60.0)
        .query_timeout(1.0)
        .self_address_timeout(0.5)
        .self_address_poll_interval(0.05)
        .dial_timeout(0.1)
        .ready_timeout(1.0)
        .build()
}

/// Writes the files a node leaves behind after running alone at `address`.
pub fn persist_solo_membership(store: &MembershipStore, address: &str) {
    fs::create_dir_all(store.dir()).unwrap();
    fs::write(
        store.info_path(),
        format!(
            "ID: {}\nAddress: {}\nRole: 0\n",
            generate_id(address),
            address
        ),
    )
    .unwrap();
    store.save(&[NodeRecord::new(address, NodeRole::Voter)]).unwrap();
}

pub fn read_file(path: impl AsRef<std::path::Path>) -> String {
    fs::read_to_string(path).unwrap()
}
