//! Command templates used by the resource kinds

// Forwarder control channel
pub const CMD_FWD_CREATE_MEMIF: &str =
    "{ctl} create memif key {key} socket {iface.parent.socket_path} hw-addr {iface.parent.mac_address} {role}";
pub const CMD_FWD_SHOW_MEMIF: &str = "{ctl} show memif";
pub const CMD_FWD_DELETE_MEMIF: &str = "{ctl} delete memif {iface.device_name}";
pub const CMD_FWD_CREATE_HOST_IFACE: &str =
    "{ctl} create host-interface name {iface.parent.device_name} hw-addr {iface.parent.mac_address}";
pub const CMD_FWD_DELETE_HOST_IFACE: &str = "{ctl} delete host-interface name {iface.parent.device_name}";
pub const CMD_FWD_SET_IP: &str = "{ctl} set int ip address {iface.device_name} {ip_address}/{prefix_len}";
pub const CMD_FWD_SET_STATE: &str = "{ctl} set int state {iface.device_name} {state}";
pub const CMD_FWD_SHOW_IFACE: &str = "{ctl} show interface {iface.device_name}";
pub const CMD_FWD_ENABLE_PLUGIN: &str = "{ctl} {plugin} control start";

// Forwarder service
pub const CMD_SERVICE_START: &str = "systemctl start {service}";
pub const CMD_SERVICE_STOP: &str = "systemctl stop {service}";
pub const CMD_SERVICE_ACTIVE: &str = "systemctl is-active --quiet {service}";

// Forwarder host
pub const CMD_DRIVER_LOADED: &str = "lsmod | grep -q ^{host.driver}";
pub const CMD_DRIVER_LOAD: &str = "modprobe {host.driver}";
pub const CMD_DRIVER_BIND: &str = "dpdk-devbind --bind {host.driver} {pci_address}";
pub const CMD_LIST_UIO: &str = "ls /dev | grep ^uio || true";

// Host network devices
pub const CMD_LINK_SHOW: &str = "ip link show dev {device.device_name}";
pub const CMD_LINK_SET_STATE: &str = "ip link set dev {device.device_name} {state}";
pub const CMD_LINK_ADD_VETH: &str = "ip link add {device.device_name} type veth peer name {device.remote.device_name}";
pub const CMD_LINK_DELETE: &str = "ip link delete {device.device_name}";
pub const CMD_SET_OFFLOAD: &str = "ethtool -K {device.device_name} rx {state} tx {state} tso {state} gso {state} gro {state}";

// Containers
pub const CMD_CONTAINER_PID: &str = "lxc info {container.container_name} | grep Pid | cut -d \" \" -f 2";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::CommandTemplate;

    #[test]
    fn test_all_templates_parse() {
        for text in [
            CMD_FWD_CREATE_MEMIF,
            CMD_FWD_SHOW_MEMIF,
            CMD_FWD_DELETE_MEMIF,
            CMD_FWD_CREATE_HOST_IFACE,
            CMD_FWD_DELETE_HOST_IFACE,
            CMD_FWD_SET_IP,
            CMD_FWD_SET_STATE,
            CMD_FWD_SHOW_IFACE,
            CMD_FWD_ENABLE_PLUGIN,
            CMD_SERVICE_START,
            CMD_SERVICE_STOP,
            CMD_SERVICE_ACTIVE,
            CMD_DRIVER_LOADED,
            CMD_DRIVER_LOAD,
            CMD_DRIVER_BIND,
            CMD_LIST_UIO,
            CMD_LINK_SHOW,
            CMD_LINK_SET_STATE,
            CMD_LINK_ADD_VETH,
            CMD_LINK_DELETE,
            CMD_SET_OFFLOAD,
            CMD_CONTAINER_PID,
        ] {
            assert!(CommandTemplate::parse(text).is_ok(), "{}", text);
        }
    }

    #[test]
    fn test_memif_roots() {
        let t = CommandTemplate::parse(CMD_FWD_CREATE_MEMIF).unwrap();
        assert_eq!(t.roots(), vec!["ctl", "key", "iface", "role"]);
    }
}
