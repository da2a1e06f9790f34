//! Container descriptors and lifecycle against an in-memory hypervisor

mod common;

use common::Testbed;
use netbed_common::{EngineConfig, Error, LifecycleState, ResourceKey, Value};
use netbed_engine::resources::{forwarder_host, ForwarderHost};
use netbed_engine::{AddressAllocator, ContainerDescriptor, ResourceContext, SourceMode};
use std::sync::Arc;

async fn describe(tb: &Testbed, key: &ResourceKey) -> netbed_common::Result<ContainerDescriptor> {
    let ctx = ResourceContext::new(tb.manager().clone(), tb.manager().get(key).unwrap());
    tb.container_behavior().descriptor(&ctx).await
}

#[tokio::test]
async fn cached_image_is_used_locally() {
    let tb = Testbed::new().await;
    let c1 = tb.container("c1", &[("image", Value::from("base"))]).await;

    let descriptor = describe(&tb, &c1).await.unwrap();
    assert_eq!(descriptor.source.mode, SourceMode::Local);
    assert_eq!(descriptor.source.alias, "base");
    assert_eq!(descriptor.source.server, None);
}

#[tokio::test]
async fn missing_image_falls_back_to_distribution() {
    let tb = Testbed::new().await;
    let c1 = tb.container("c1", &[("image", Value::from("missing"))]).await;

    let descriptor = describe(&tb, &c1).await.unwrap();
    let config = EngineConfig::default();
    assert_eq!(descriptor.source.mode, SourceMode::Pull);
    assert_eq!(descriptor.source.alias, config.container.default_distribution);
    assert_eq!(descriptor.source.server.as_deref(), Some(config.container.source_server.as_str()));
    assert_eq!(descriptor.source.protocol.as_deref(), Some("simplestreams"));
}

#[tokio::test]
async fn unresolvable_image_is_an_error() {
    let tb = Testbed::new().await;
    let c1 = tb
        .container("c1", &[("image", Value::from("missing")), ("dist", Value::Null)])
        .await;

    let err = describe(&tb, &c1).await.unwrap_err();
    assert!(matches!(err, Error::ImageUnresolved { ref image } if image == "missing"));
}

#[tokio::test]
async fn management_nic_is_bridged() {
    let tb = Testbed::new().await;
    let c1 = tb.container("c1", &[]).await;

    let descriptor = describe(&tb, &c1).await.unwrap();
    assert_eq!(descriptor.name, "c1");
    assert_eq!(descriptor.profiles, vec!["default".to_string()]);
    assert_eq!(
        descriptor.config.get("user.network_mode").map(String::as_str),
        Some("link-local")
    );
    assert!(!descriptor.config.contains_key("raw.lxc"));

    assert_eq!(descriptor.devices.len(), 1);
    let nic = &descriptor.devices["eth0"];
    assert_eq!(nic.kind, "nic");
    assert_eq!(nic.property("nictype"), Some("bridged"));
    assert_eq!(nic.property("parent"), Some("lxdbr0"));
    assert_eq!(nic.property("host_name"), Some("veth-c1"));
    let mac = tb.allocator.get_mac(&c1).unwrap();
    assert_eq!(nic.property("hwaddr"), Some(mac.as_str()));

    // The management device is registered under the container
    let eth0 = ResourceKey::new("net_device", ["c1", "eth0"]);
    let device = tb.manager().get(&eth0).unwrap();
    assert!(!device.get_bool("monitored").unwrap());
    assert_eq!(tb.manager().get(&c1).unwrap().get_ref("host_interface").unwrap(), eth0);
}

#[tokio::test]
async fn image_template_has_no_network() {
    let tb = Testbed::new().await;
    let c1 = tb.container("c1", &[("is_image", Value::from(true))]).await;

    let descriptor = describe(&tb, &c1).await.unwrap();
    assert!(descriptor.devices.is_empty());
    assert!(!descriptor.config.contains_key("user.network_mode"));
}

#[tokio::test]
async fn forwarder_profile_exposes_uio_devices() {
    let tb = Testbed::new().await;
    let fh = tb
        .engine
        .commit(
            forwarder_host::declare(&tb.schemas.forwarder_host, &tb.node),
            Arc::new(ForwarderHost),
        )
        .await
        .unwrap()
        .key()
        .clone();
    assert_eq!(tb.engine.converge(&fh).await.unwrap(), LifecycleState::Present);
    tb.host.respond("ls /dev", 0, "uio0\nuio1\n");

    let profiles = Value::List(vec!["default".into(), "vpp".into()]);
    let c1 = tb.container("c1", &[("profiles", profiles)]).await;
    assert_eq!(tb.engine.converge(&c1).await.unwrap(), LifecycleState::Present);

    assert!(tb.host.commands().iter().any(|c| c.starts_with("ls /dev")));
    assert_eq!(
        tb.manager().get(&fh).unwrap().get_list("uio_devices").unwrap(),
        vec![Value::from("uio0"), Value::from("uio1")]
    );

    let created = tb.hypervisor.created.lock().clone();
    assert_eq!(created.len(), 1);
    let descriptor = &created[0];
    let config = EngineConfig::default();
    assert_eq!(descriptor.config.get("raw.lxc"), Some(&config.container.forwarder_raw_lxc));
    assert_eq!(
        descriptor.config.get("security.privileged").map(String::as_str),
        Some("true")
    );
    assert_eq!(
        descriptor.devices.keys().collect::<Vec<_>>(),
        vec!["eth0", "uio0", "uio1"]
    );
    let uio0 = &descriptor.devices["uio0"];
    assert_eq!(uio0.kind, "unix-char");
    assert_eq!(uio0.property("path"), Some("/dev/uio0"));
}

#[tokio::test]
async fn default_profile_skips_uio_lookup() {
    let tb = Testbed::new().await;
    let fh = tb
        .engine
        .commit(
            forwarder_host::declare(&tb.schemas.forwarder_host, &tb.node),
            Arc::new(ForwarderHost),
        )
        .await
        .unwrap()
        .key()
        .clone();
    tb.engine.converge(&fh).await.unwrap();

    let c1 = tb.container("c1", &[]).await;
    assert_eq!(tb.engine.converge(&c1).await.unwrap(), LifecycleState::Present);
    assert!(!tb.host.commands().iter().any(|c| c.starts_with("ls /dev")));
}

#[tokio::test]
async fn container_is_created_and_started() {
    let tb = Testbed::new().await;
    let c1 = tb.container("c1", &[("image", Value::from("missing"))]).await;

    assert_eq!(tb.engine.converge(&c1).await.unwrap(), LifecycleState::Present);

    let created = tb.hypervisor.created.lock().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].source.mode, SourceMode::Pull);
    assert_eq!(created[0].devices.keys().collect::<Vec<_>>(), vec!["eth0"]);
    assert!(!created[0].config.contains_key("raw.lxc"));
    assert!(!created[0].config.contains_key("security.privileged"));
    assert!(tb.hypervisor.running.lock().contains("c1"));

    // Already present: a second pass creates nothing
    assert_eq!(tb.engine.converge(&c1).await.unwrap(), LifecycleState::Present);
    assert_eq!(tb.hypervisor.created.lock().len(), 1);
}

#[tokio::test]
async fn publish_returns_image_metadata() {
    let tb = Testbed::new().await;
    let c1 = tb.container("c1", &[]).await;
    tb.engine.converge(&c1).await.unwrap();

    let output = tb.engine.invoke(&c1, "publish-as-image").await.unwrap();
    assert_eq!(output.value.unwrap()["fingerprint"], "f00d");

    let published = tb.hypervisor.published.lock().clone();
    assert_eq!(published.len(), 1);
    assert!(published[0].public);
    assert_eq!(published[0].source.name, "image-c1");
    assert_eq!(published[0].properties["architecture"], "x86_64");
}

#[tokio::test]
async fn unknown_method_keeps_state() {
    let tb = Testbed::new().await;
    let c1 = tb.container("c1", &[]).await;
    tb.engine.converge(&c1).await.unwrap();

    let err = tb.engine.invoke(&c1, "teleport").await.unwrap_err();
    assert!(matches!(err, Error::UnknownMethod { .. }));
    let handle = tb.manager().get(&c1).unwrap();
    assert_eq!(handle.state(), LifecycleState::Present);
    assert!(handle.failure().is_some());
}

#[tokio::test]
async fn stop_and_delete() {
    let tb = Testbed::new().await;
    let c1 = tb.container("c1", &[]).await;
    tb.engine.converge(&c1).await.unwrap();

    tb.engine.invoke(&c1, "stop").await.unwrap();
    assert!(!tb.hypervisor.running.lock().contains("c1"));

    tb.engine.delete(&c1).await.unwrap();
    assert!(!tb.hypervisor.containers.lock().contains("c1"));
    assert!(!tb.manager().contains(&c1));
}

#[tokio::test]
async fn deleted_container_can_be_declared_again() {
    let tb = Testbed::new().await;
    let c1 = tb.container("c1", &[]).await;
    let eth0 = ResourceKey::new("net_device", ["c1", "eth0"]);
    tb.engine.converge(&c1).await.unwrap();

    tb.engine.delete(&c1).await.unwrap();
    assert!(!tb.manager().contains(&eth0));
    assert_eq!(tb.manager().keys(), vec![tb.node.clone()]);

    let again = tb.container("c1", &[]).await;
    assert_eq!(again, c1);
    assert!(tb.manager().contains(&eth0));
    assert_eq!(tb.engine.converge(&again).await.unwrap(), LifecycleState::Present);
}

#[tokio::test]
async fn pid_is_read_from_host() {
    let tb = Testbed::new().await;
    tb.host.respond("lxc info c1", 0, "4242\n");
    let c1 = tb.container("c1", &[]).await;

    let pid = tb.engine.refresh_attribute(&c1, "pid").await.unwrap();
    assert_eq!(pid, Value::Integer(4242));
}
