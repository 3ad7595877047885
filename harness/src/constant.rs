pub const PEER_PORT: u16 = 9001;

pub const APP_LABEL: &str = "kvstore";

pub const SELF_POD: &str = "kvstore-0";
pub const SELF_IP: &str = "10.0.0.2";
pub const SELF_ADDR: &str = "10.0.0.2:9001";

pub const PEER_IPS: [&str; 3] = ["10.0.0.3", "10.0.0.4", "10.0.0.5"];
pub const PEER_ADDRS: [&str; 3] = ["10.0.0.3:9001", "10.0.0.4:9001", "10.0.0.5:9001"];

pub const RESCHEDULED_IP: &str = "10.0.0.9";
pub const RESCHEDULED_ADDR: &str = "10.0.0.9:9001";
