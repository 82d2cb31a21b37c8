//! Device-layer behavior over a scripted passthrough device.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use common::{http_transport, FakeHttp, PassthroughDeviceSim};
use tapo::device::hub::HubChild;
use tapo::error::TapoError;
use tapo::factory::{connect, Device};
use tapo::poll::EventSubscriptionOptions;
use tapo::response::child::S200BEventKind;
use tapo::{AuthCredential, TapoClient, TapoRequest};

fn credential() -> AuthCredential {
    AuthCredential::new("user@example.com", "secret")
}

fn sim_with(fixtures: &[(&str, serde_json::Value)]) -> (Arc<PassthroughDeviceSim>, Arc<FakeHttp>) {
    let sim = Arc::new(PassthroughDeviceSim::new(
        [0x31; 16],
        [0x32; 16],
        "token",
        fixtures,
    ));
    let handler = Arc::clone(&sim);
    let http = Arc::new(FakeHttp::new(move |request| handler.handle(request)));
    (sim, http)
}

fn hub_fixtures() -> Vec<(&'static str, serde_json::Value)> {
    vec![
        (
            "get_device_info",
            json!({
                "device_id": "hub-1",
                "type": "SMART.TAPOHUB",
                "model": "H100",
                "mac": "AA-BB-CC-DD-EE-FF",
                "nickname": "SHVi",
                "hw_ver": "2.0",
                "fw_ver": "1.5.5",
                "hw_id": "HWID",
                "oem_id": "OEMID",
                "overheated": false,
                "rssi": -38,
                "signal_level": 3,
                "in_alarm": false
            }),
        ),
        (
            "component_nego",
            json!({ "component_list": [
                { "id": "control_child", "ver_code": 2 },
                { "id": "alarm", "ver_code": 1 },
            ]}),
        ),
        (
            "get_child_device_list",
            json!({
                "child_device_list": [
                    { "device_id": "t110-1", "model": "T110", "parent_device_id": "hub-1" },
                    { "device_id": "s200-1", "model": "S200B", "parent_device_id": "hub-1" },
                    { "device_id": "mystery-1", "model": "xyz-9", "parent_device_id": "hub-1" },
                ],
                "start_index": 0,
                "sum": 3
            }),
        ),
        (
            "component_nego_t110-1",
            json!({ "component_list": [{ "id": "trigger_log", "ver_code": 1 }] }),
        ),
        (
            "get_device_info_t110-1",
            json!({
                "device_id": "t110-1",
                "parent_device_id": "hub-1",
                "type": "SMART.TAPOSENSOR",
                "model": "T110",
                "mac": "11-11-11-11-11-11",
                "hw_ver": "1.0",
                "fw_ver": "1.9.0",
                "nickname": "RG9vcg==",
                "rssi": -61,
                "signal_level": 2,
                "at_low_battery": false,
                "status": "online",
                "open": true,
                "report_interval": 16
            }),
        ),
        (
            "component_nego_s200-1",
            json!({ "component_list": [{ "id": "trigger_log", "ver_code": 1 }] }),
        ),
        (
            "get_device_info_s200-1",
            json!({
                "device_id": "s200-1",
                "parent_device_id": "hub-1",
                "type": "SMART.TAPOSENSOR",
                "model": "S200B",
                "mac": "22-22-22-22-22-22",
                "hw_ver": "1.0",
                "fw_ver": "1.11.0",
                "nickname": "QnV0dG9u",
                "rssi": -55,
                "signal_level": 2,
                "at_low_battery": false,
                "status": "online",
                "report_interval": 16
            }),
        ),
        (
            "get_trigger_logs_s200-1",
            json!({
                "start_id": 3,
                "sum": 5,
                "logs": [
                    { "id": 3, "timestamp": 400, "event": "singleClick" },
                    { "id": 1, "timestamp": 300, "event": "singleClick" },
                    { "id": 2, "timestamp": 200, "event": "doubleClick" },
                    { "id": 1, "timestamp": 100, "event": "singleClick" },
                    { "id": 1, "timestamp": 50, "event": "singleClick" },
                ]
            }),
        ),
    ]
}

#[tokio::test]
async fn hub_enumerates_known_children_and_drops_unknown_models() {
    let (_sim, http) = sim_with(&hub_fixtures());
    let device = connect("10.0.1.2", None, credential(), http_transport(&http))
        .await
        .unwrap();
    let mut hub = match device {
        Device::Hub(hub) => hub,
        _ => panic!("expected a hub"),
    };
    hub.update().await.unwrap();

    let ids: Vec<&str> = hub.children().iter().map(HubChild::device_id).collect();
    assert_eq!(ids, vec!["t110-1", "s200-1"]);

    for child in hub.children() {
        let info = child.core().device_info().unwrap();
        assert!(!info.device_id.is_empty());
        assert_eq!(child.core().parent_device_id().unwrap(), "hub-1");
        assert!(child.core().state().is_ok());
    }

    match &hub.children()[0] {
        HubChild::T110(door) => {
            assert!(door.is_open().unwrap());
            assert_eq!(door.core().nickname().unwrap(), "Door");
        }
        _ => panic!("first child should be the T110"),
    }
}

#[tokio::test]
async fn hub_alarm_round_trip() {
    let (_sim, http) = sim_with(&hub_fixtures());
    let device = connect("10.0.1.3", None, credential(), http_transport(&http))
        .await
        .unwrap();
    let mut hub = match device {
        Device::Hub(hub) => hub,
        _ => panic!("expected a hub"),
    };
    hub.update().await.unwrap();
    assert!(hub.has_alarm().unwrap());
    assert!(!hub.is_alarm_on().unwrap());

    hub.turn_alarm_on(None).await.unwrap();
    hub.update().await.unwrap();
    assert!(hub.is_alarm_on().unwrap());

    hub.turn_alarm_off().await.unwrap();
    hub.update().await.unwrap();
    assert!(!hub.is_alarm_on().unwrap());
}

#[tokio::test(start_paused = true)]
async fn s200_event_subscription_collapses_rapid_duplicates() {
    let (_sim, http) = sim_with(&hub_fixtures());
    let device = connect("10.0.1.4", None, credential(), http_transport(&http))
        .await
        .unwrap();
    let mut hub = match device {
        Device::Hub(hub) => hub,
        _ => panic!("expected a hub"),
    };
    hub.update().await.unwrap();

    let button = hub
        .children_mut()
        .iter_mut()
        .find_map(|child| match child {
            HubChild::S200B(button) => Some(button),
            _ => None,
        })
        .expect("hub should expose the S200B");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = button.subscribe_event_logs(
        EventSubscriptionOptions::default(),
        move |event| sink.lock().push((event.id, event.kind.clone())),
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    subscription.unsubscribe();

    let events = seen.lock().clone();
    let ids: Vec<u64> = events.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![1, 2, 1, 3]);
    assert_eq!(events[1].1, S200BEventKind::DoubleClick);
}

#[tokio::test]
async fn plug_accessors_require_update_and_track_switching() {
    let fixtures = vec![
        (
            "get_device_info",
            json!({
                "device_id": "plug-1",
                "type": "SMART.TAPOPLUG",
                "model": "P115",
                "mac": "AA-00-11-22-33-44",
                "nickname": "S2V0dGxl",
                "hw_ver": "1.0",
                "fw_ver": "1.2.3",
                "overheated": false,
                "rssi": -47,
                "signal_level": 3,
                "device_on": false
            }),
        ),
        (
            "component_nego",
            json!({ "component_list": [{ "id": "energy_monitoring", "ver_code": 1 }] }),
        ),
        (
            "get_energy_usage",
            json!({ "today_runtime": 5, "month_runtime": 100, "today_energy": 12, "month_energy": 430, "current_power": 8300 }),
        ),
        ("get_current_power", json!({ "current_power": 8 })),
    ];
    let (_sim, http) = sim_with(&fixtures);
    let device = connect("10.0.1.5", None, credential(), http_transport(&http))
        .await
        .unwrap();
    let mut plug = match device {
        Device::Plug(plug) => plug,
        _ => panic!("expected a plug"),
    };

    // Accessors refuse to answer before the first update.
    assert!(matches!(
        plug.core().device_info(),
        Err(TapoError::NeedsUpdate)
    ));
    assert!(matches!(plug.is_on(), Err(TapoError::NeedsUpdate)));

    plug.update().await.unwrap();
    assert!(!plug.is_on().unwrap());
    assert_eq!(plug.core().nickname().unwrap(), "Kettle");
    let energy = plug.energy_info().unwrap().expect("metering present");
    assert_eq!(energy.month_energy, 430);
    assert_eq!(plug.power_info().unwrap().unwrap().current_power, 8);

    plug.turn_on().await.unwrap();
    plug.update().await.unwrap();
    assert!(plug.is_on().unwrap());
}

#[tokio::test]
async fn strip_exposes_sockets_with_overheat_mapping() {
    let fixtures = vec![
        (
            "get_device_info",
            json!({
                "device_id": "strip-1",
                "type": "SMART.TAPOPLUG",
                "model": "P300",
                "mac": "BB-00-11-22-33-44",
                "nickname": "U3RyaXA=",
                "hw_ver": "1.0",
                "fw_ver": "1.0.15",
                "overheated": false,
                "rssi": -52,
                "signal_level": 2
            }),
        ),
        (
            "component_nego",
            json!({ "component_list": [{ "id": "control_child", "ver_code": 1 }] }),
        ),
        (
            "get_child_device_list",
            json!({
                "child_device_list": [
                    { "device_id": "sock-1" },
                    { "device_id": "sock-2" },
                ],
                "start_index": 0,
                "sum": 2
            }),
        ),
        ("component_nego_sock-1", json!({ "component_list": [] })),
        ("component_nego_sock-2", json!({ "component_list": [] })),
        (
            "get_device_info_sock-1",
            json!({
                "device_id": "sock-1",
                "type": "SMART.TAPOPLUG",
                "model": "P300",
                "nickname": "U29jaw==",
                "device_on": true,
                "overheat_status": "normal",
                "original_device_id": "strip-1"
            }),
        ),
        (
            "get_device_info_sock-2",
            json!({
                "device_id": "sock-2",
                "type": "SMART.TAPOPLUG",
                "model": "P300",
                "nickname": "U29jaw==",
                "device_on": false,
                "overheat_status": "overheated",
                "original_device_id": "strip-1"
            }),
        ),
    ];
    let (_sim, http) = sim_with(&fixtures);
    let device = connect("10.0.1.6", None, credential(), http_transport(&http))
        .await
        .unwrap();
    let mut strip = match device {
        Device::PlugStrip(strip) => strip,
        _ => panic!("expected a strip"),
    };
    strip.update().await.unwrap();

    assert_eq!(strip.sockets().len(), 2);
    let first = &strip.sockets()[0];
    assert!(first.is_on().unwrap());
    assert!(!first.device_info().unwrap().overheated);
    assert_eq!(first.parent_device_id().unwrap(), Some("strip-1"));
    let second = &strip.sockets()[1];
    assert!(!second.is_on().unwrap());
    assert!(second.device_info().unwrap().overheated);
}

#[tokio::test]
async fn bulb_gates_color_features_on_components() {
    let fixtures = vec![
        (
            "get_device_info",
            json!({
                "device_id": "bulb-1",
                "type": "SMART.TAPOBULB",
                "model": "L530",
                "mac": "CC-00-11-22-33-44",
                "nickname": "TGFtcA==",
                "hw_ver": "2.0",
                "fw_ver": "1.1.0",
                "overheated": false,
                "rssi": -44,
                "signal_level": 3,
                "device_on": true,
                "brightness": 80,
                "hue": 120,
                "saturation": 90,
                "color_temp": 0,
                "color_temp_range": [2500, 6500]
            }),
        ),
        (
            "component_nego",
            json!({ "component_list": [
                { "id": "color", "ver_code": 1 },
                { "id": "color_temperature", "ver_code": 2 },
            ]}),
        ),
    ];
    let (_sim, http) = sim_with(&fixtures);
    let device = connect("10.0.1.8", None, credential(), http_transport(&http))
        .await
        .unwrap();
    let mut bulb = match device {
        Device::Bulb(bulb) => bulb,
        _ => panic!("expected a bulb"),
    };
    bulb.update().await.unwrap();

    assert!(bulb.is_on().unwrap());
    assert!(bulb.is_color().unwrap());
    assert!(bulb.is_color_temperature().unwrap());
    assert!(!bulb.is_led_strip().unwrap());
    assert_eq!(bulb.brightness().unwrap(), Some(80));
    let hs = bulb.hs().unwrap().unwrap();
    assert_eq!((hs.hue, hs.saturation), (120, 90));
    assert_eq!(bulb.color_temp_range().unwrap(), (2500, 6500));

    // Effects are gated behind the light-strip component.
    assert!(matches!(
        bulb.set_light_effect(json!({ "name": "Aurora" })).await,
        Err(TapoError::Unsupported("light_strip_lighting_effect"))
    ));

    bulb.set_brightness(30).await.unwrap();
    bulb.update().await.unwrap();
    assert_eq!(bulb.brightness().unwrap(), Some(30));
}

#[tokio::test]
async fn batched_requests_preserve_issue_order() {
    let fixtures = vec![
        ("get_device_info", json!({ "device_id": "plug-1", "type": "SMART.TAPOPLUG", "model": "P100" })),
        ("get_device_usage", json!({ "time_usage": { "today": 7 } })),
    ];
    let sim = Arc::new(PassthroughDeviceSim::new(
        [0x41; 16],
        [0x42; 16],
        "token",
        &fixtures,
    ));
    let handler = Arc::clone(&sim);
    let http = Arc::new(FakeHttp::new(move |request| handler.handle(request)));

    let protocol = tapo::TapoProtocol::Passthrough(tapo::PassthroughProtocol::new(
        credential(),
        "http://10.0.1.7/app".into(),
        http_transport(&http),
    ));
    let client = TapoClient::new(protocol);
    let responses = client
        .multiple_request(vec![
            TapoRequest::get_device_info(),
            TapoRequest::get_device_usage(),
        ])
        .await
        .unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(
        responses[0].clone().into_result().unwrap()["device_id"],
        json!("plug-1")
    );
    assert_eq!(
        responses[1].clone().into_result().unwrap()["time_usage"]["today"],
        json!(7)
    );
}
