//! Device and driver lifecycle scenarios against private ledgers.
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tactile::{
    Error,
    dev::{Device, DeviceLedger, DeviceType, Driver, DriverLedger, Handle},
    module::Module,
};

static DISPLAY_TYPE: DeviceType = DeviceType::new("display");

struct Counters {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

fn counted_driver(name: &str, compatible: &str, counters: &Arc<Counters>) -> Handle<Driver> {
    let on_start = counters.clone();
    let on_stop = counters.clone();
    Driver::builder(name)
        .compatible(&[compatible])
        .device_type(&DISPLAY_TYPE)
        .start_device(move |_| {
            on_start.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .stop_device(move |_| {
            on_stop.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
}

fn counters() -> Arc<Counters> {
    Arc::new(Counters {
        starts: AtomicUsize::new(0),
        stops: AtomicUsize::new(0),
    })
}

#[test]
fn device_without_driver_cannot_start() {
    let devices = DeviceLedger::new();
    let device = Device::new("lonely");
    device.construct().unwrap();
    assert_eq!(device.start(), Err(Error::InvalidState));
    devices.add(&device).unwrap();
    assert_eq!(device.start(), Err(Error::InvalidState));
    assert!(!device.is_started());
}

#[test]
fn full_lifecycle_through_a_compatible_driver() {
    let devices = DeviceLedger::new();
    let drivers = DriverLedger::new();
    let counters = counters();
    let driver = counted_driver("foo", "vendor,foo", &counters);
    drivers.construct_add(&driver).unwrap();

    let device = Device::new("foo0");
    devices.construct_add_start(&device, "vendor,foo", &drivers).unwrap();
    assert!(device.is_started());
    assert!(device.driver().is_some_and(|d| d.ptr_eq(&driver)));
    assert_eq!(driver.use_count(), 1);

    assert_eq!(device.destruct(), Err(Error::InvalidState));
    assert!(device.is_started() && device.is_added());

    device.stop().unwrap();
    assert_eq!(driver.use_count(), 0);
    devices.remove(&device).unwrap();
    device.destruct().unwrap();
    assert!(!device.is_constructed());
    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
    assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn start_and_stop_are_idempotent() {
    let devices = DeviceLedger::new();
    let drivers = DriverLedger::new();
    let counters = counters();
    let driver = counted_driver("idem", "vendor,idem", &counters);
    drivers.construct_add(&driver).unwrap();
    let device = Device::new("idem0");
    devices.construct_add(&device, "vendor,idem", &drivers).unwrap();

    device.start().unwrap();
    device.start().unwrap();
    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
    assert_eq!(driver.use_count(), 1);

    device.stop().unwrap();
    device.stop().unwrap();
    assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    assert_eq!(driver.use_count(), 0);
}

#[test]
fn missing_driver_is_a_resource_error() {
    let devices = DeviceLedger::new();
    let drivers = DriverLedger::new();
    let device = Device::new("orphan");
    assert_eq!(devices.construct_add(&device, "vendor,none", &drivers), Err(Error::Resource));
    assert!(!device.is_constructed());
    assert!(devices.is_empty());
}

#[test]
fn failed_start_rolls_back_and_keeps_the_error() {
    let devices = DeviceLedger::new();
    let drivers = DriverLedger::new();
    let driver = Driver::builder("flaky")
        .compatible(&["vendor,flaky"])
        .start_device(|_| Err(Error::Timeout))
        .build();
    drivers.construct_add(&driver).unwrap();

    let rolled_back = Device::new("flaky0");
    assert_eq!(devices.construct_add_start(&rolled_back, "vendor,flaky", &drivers), Err(Error::Timeout));
    assert!(!rolled_back.is_constructed());
    assert!(devices.find_by_name("flaky0").is_none());

    let kept = Device::new("flaky1");
    devices.construct_add(&kept, "vendor,flaky", &drivers).unwrap();
    assert_eq!(kept.start(), Err(Error::Timeout));
    assert_eq!(kept.start_result(), Err(Error::Timeout));
    assert!(!kept.is_started());
    assert!(devices.find_by_name("flaky1").is_some());
    assert_eq!(driver.use_count(), 0);
}

#[test]
fn failed_stop_leaves_the_device_started() {
    let devices = DeviceLedger::new();
    let drivers = DriverLedger::new();
    let refuse = Arc::new(AtomicUsize::new(1));
    let refusals = refuse.clone();
    let driver = Driver::builder("sticky")
        .compatible(&["vendor,sticky"])
        .stop_device(move |_| {
            if refusals.load(Ordering::SeqCst) > 0 {
                refusals.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::NotSupported);
            }
            Ok(())
        })
        .build();
    drivers.construct_add(&driver).unwrap();
    let device = Device::new("sticky0");
    devices.construct_add_start(&device, "vendor,sticky", &drivers).unwrap();

    assert_eq!(device.stop(), Err(Error::NotSupported));
    assert!(device.is_started());
    assert_eq!(driver.use_count(), 1);

    device.stop().unwrap();
    assert!(!device.is_started());
    assert_eq!(driver.use_count(), 0);
}

#[test]
fn parents_and_children() {
    let devices = DeviceLedger::new();
    let parent = Device::new("bus");
    let child = Device::new("sensor");
    parent.construct().unwrap();
    child.construct().unwrap();
    child.set_parent(Some(&parent)).unwrap();

    assert_eq!(devices.add(&child), Err(Error::InvalidState));
    assert!(!child.is_added());

    devices.add(&parent).unwrap();
    devices.add(&child).unwrap();
    assert_eq!(child.set_parent(None), Err(Error::InvalidState));
    assert_eq!(parent.child_count(), 1);

    devices.remove(&parent).unwrap();
    assert_eq!(parent.destruct(), Err(Error::InvalidState));

    devices.remove(&child).unwrap();
    assert_eq!(parent.child_count(), 0);
    parent.destruct().unwrap();
    child.destruct().unwrap();
}

#[test]
fn ledger_visits_exactly_the_added_devices() {
    let devices = DeviceLedger::new();
    let all: Vec<_> = (0..6).map(|i| Device::new(&format!("dev{i}"))).collect();
    for device in &all {
        device.construct().unwrap();
        devices.add(device).unwrap();
    }
    for device in all.iter().step_by(2) {
        devices.remove(device).unwrap();
    }
    assert_eq!(devices.remove(&all[0]), Err(Error::InvalidState));

    let mut visited = Vec::new();
    devices.for_each(|device| {
        visited.push(device.name().to_string());
        true
    });
    assert_eq!(visited, ["dev1", "dev3", "dev5"]);

    let mut first = None;
    devices.for_each(|device| {
        first = Some(device.name().to_string());
        false
    });
    assert_eq!(first.as_deref(), Some("dev1"));
}

#[test]
fn discovery_by_type_sees_only_started_devices() {
    let devices = DeviceLedger::new();
    let drivers = DriverLedger::new();
    let counters = counters();
    drivers.construct_add(&counted_driver("panel", "vendor,panel", &counters)).unwrap();
    let on = Device::new("panel-on");
    let off = Device::new("panel-off");
    devices.construct_add_start(&on, "vendor,panel", &drivers).unwrap();
    devices.construct_add(&off, "vendor,panel", &drivers).unwrap();

    let mut seen = Vec::new();
    devices.for_each_of_type(&DISPLAY_TYPE, |device| {
        seen.push(device.name().to_string());
        true
    });
    assert_eq!(seen, ["panel-on"]);
    assert!(devices.exists_of_type(&DISPLAY_TYPE));
    assert!(off.device_type().is_some_and(|t| t.is(&DISPLAY_TYPE)));
}

#[test]
fn bound_drivers_cannot_be_destructed() {
    let devices = DeviceLedger::new();
    let drivers = DriverLedger::new();
    let owner = Module::builder("panel-module").build();
    let driver = Driver::builder("owned").compatible(&["vendor,owned"]).owner(&owner).build();
    drivers.construct_add(&driver).unwrap();
    let device = Device::new("owned0");
    devices.construct_add_start(&device, "vendor,owned", &drivers).unwrap();

    assert_eq!(drivers.remove_destruct(&driver), Err(Error::InvalidState));
    drivers.remove(&driver).unwrap();
    assert_eq!(driver.destruct(), Err(Error::InvalidState));

    device.stop().unwrap();
    driver.destruct().unwrap();
}

#[test]
fn driver_data_lives_while_bound() {
    struct PanelState {
        frames: u32,
    }
    let devices = DeviceLedger::new();
    let drivers = DriverLedger::new();
    let driver = Driver::builder("stateful")
        .compatible(&["vendor,stateful"])
        .start_device(|device| device.set_driver_data(PanelState { frames: 3 }))
        .build();
    drivers.construct_add(&driver).unwrap();
    let device = Device::with_config("stateful0", 240u16);
    devices.construct_add_start(&device, "vendor,stateful", &drivers).unwrap();

    assert_eq!(device.config::<u16>(), Some(&240));
    assert_eq!(device.driver_data::<PanelState>().map(|state| state.frames), Some(3));
    device.stop().unwrap();
    assert!(device.driver_data::<PanelState>().is_none());
}
