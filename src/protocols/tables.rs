// src/protocols/tables.rs
//
// Built-in frame tables for the three protocols the LED controller firmware understands
// (selected on the firmware side by CAN_PROTOCOL = 0, 1, 2).

use super::field::{ByteWidth::*, Field};
use super::frame::FrameDefinition;
use super::Protocol;

pub const CUSTOM_PROTOCOL: &str = "Custom Protocol";
pub const LINK_GENERIC: &str = "Link ECU Generic Dashboard";
pub const LINK_GENERIC_2: &str = "Link ECU Generic Dashboard 2";

/// All built-in protocols, in menu order.
pub fn builtin_protocols() -> Vec<Protocol> {
    vec![
        Protocol::new(CUSTOM_PROTOCOL, custom_frames()),
        Protocol::new(LINK_GENERIC, link_generic_frames()),
        Protocol::new(LINK_GENERIC_2, link_generic2_frames()),
    ]
}

// ============================================================================
// Custom Protocol (CAN_PROTOCOL = 0)
// ============================================================================

fn custom_frames() -> Vec<FrameDefinition> {
    vec![
        FrameDefinition::new(
            0x100,
            "Throttle",
            "Throttle pedal position",
            1,
            vec![Field::new("throttle", "Throttle %", (0.0, 100.0), 0.0, "%", 0, One)],
        ),
        FrameDefinition::new(
            0x101,
            "Pedals",
            "Brake, Handbrake, Clutch positions",
            3,
            vec![
                Field::new("brake", "Brake %", (0.0, 100.0), 0.0, "%", 0, One),
                Field::new("handbrake", "Handbrake %", (0.0, 100.0), 0.0, "%", 1, One),
                Field::new("clutch", "Clutch %", (0.0, 100.0), 0.0, "%", 2, One),
            ],
        ),
        FrameDefinition::new(
            0x102,
            "RPM",
            "Engine RPM",
            2,
            vec![Field::new("rpm", "Engine RPM", (0.0, 10000.0), 800.0, "rpm", 0, Two)],
        ),
        FrameDefinition::new(
            0x103,
            "Coolant",
            "Coolant temperature",
            2,
            vec![Field::new("coolant", "Coolant Temp", (0.0, 150.0), 85.0, "C", 0, Two).scaled(10.0)],
        ),
        FrameDefinition::new(
            0x104,
            "Oil Pressure",
            "Oil pressure",
            2,
            vec![Field::new("oil_pressure", "Oil Pressure", (0.0, 10.0), 4.0, "bar", 0, Two).scaled(10.0)],
        ),
        FrameDefinition::new(
            0x105,
            "Flags",
            "Rev limiter and ALS flags",
            1,
            vec![
                Field::flag("rev_limiter", "Rev Limiter Active", false, 0, 0),
                Field::flag("als_active", "ALS Active", false, 0, 1),
            ],
        ),
        FrameDefinition::new(
            0x106,
            "Ignition",
            "Ignition state",
            1,
            vec![Field::new("ignition", "Ignition On", (0.0, 1.0), 1.0, "", 0, One)],
        ),
    ]
}

// ============================================================================
// Link ECU Generic Dashboard (CAN_PROTOCOL = 1)
// ============================================================================

fn link_generic_frames() -> Vec<FrameDefinition> {
    vec![
        FrameDefinition::new(
            0x5F0,
            "RPM & TPS",
            "Engine RPM and Throttle Position",
            6,
            vec![
                Field::new("rpm", "Engine RPM", (0.0, 15000.0), 800.0, "rpm", 0, Four),
                Field::new("tps", "Throttle Position", (0.0, 100.0), 0.0, "%", 4, Two).scaled(10.0),
            ],
        ),
        FrameDefinition::new(
            0x5F1,
            "Fuel & Ignition",
            "Fuel pressure and Ignition timing",
            4,
            vec![
                Field::new("fuel_pressure", "Fuel Pressure", (0.0, 10.0), 3.0, "bar", 0, Two).scaled(10.0),
                Field::new("ign_timing", "Ignition Timing", (-20.0, 60.0), 15.0, "deg", 2, Two)
                    .scaled(10.0)
                    .signed(),
            ],
        ),
        FrameDefinition::new(
            0x5F2,
            "Pressures",
            "MAP, Baro, Lambda",
            6,
            vec![
                Field::new("map", "MAP", (0.0, 300.0), 100.0, "kPa", 0, Two).scaled(10.0),
                Field::new("baro", "Barometric", (90.0, 110.0), 101.0, "kPa", 2, Two).scaled(10.0),
                Field::new("lambda", "Lambda", (0.5, 1.5), 1.0, "", 4, Two).scaled(100.0),
            ],
        ),
        FrameDefinition::new(
            0x5F3,
            "Temperatures",
            "Coolant and Air temperatures",
            4,
            vec![
                Field::new("coolant", "Coolant Temp", (-40.0, 150.0), 85.0, "C", 0, Two).scaled(10.0),
                Field::new("air_temp", "Air Temp", (-40.0, 80.0), 25.0, "C", 2, Two).scaled(10.0),
            ],
        ),
        FrameDefinition::new(
            0x5F4,
            "Voltage & Flags",
            "Battery voltage and status flags",
            4,
            vec![
                Field::new("battery", "Battery Voltage", (8.0, 18.0), 14.0, "V", 0, Two).scaled(100.0),
                Field::flag("rev_limiter", "Rev Limiter", false, 2, 0),
                Field::flag("launch_control", "Launch Control", false, 2, 1),
                Field::flag("flat_shift", "Flat Shift", false, 2, 2),
                Field::flag("ignition", "Ignition On", true, 2, 7),
            ],
        ),
        FrameDefinition::new(
            0x5F5,
            "Gear & Oil",
            "Gear position and Oil pressure",
            4,
            vec![
                Field::new("gear", "Gear", (0.0, 8.0), 0.0, "", 0, One),
                Field::new("oil_pressure", "Oil Pressure", (0.0, 10.0), 4.0, "bar", 2, Two).scaled(10.0),
            ],
        ),
        FrameDefinition::new(
            0x5F6,
            "Vehicle Speed",
            "Vehicle speed",
            2,
            vec![Field::new("speed", "Vehicle Speed", (0.0, 300.0), 0.0, "km/h", 0, Two).scaled(10.0)],
        ),
        FrameDefinition::new(
            0x5F7,
            "Throttle Sensors",
            "Throttle position sensors",
            4,
            vec![
                Field::new("tps1", "TPS 1", (0.0, 100.0), 0.0, "%", 0, Two).scaled(10.0),
                Field::new("tps2", "TPS 2", (0.0, 100.0), 0.0, "%", 2, Two).scaled(10.0),
            ],
        ),
    ]
}

// ============================================================================
// Link ECU Generic Dashboard 2 (CAN_PROTOCOL = 2)
// ============================================================================
//
// The firmware listens on 0x2000-0x2007, outside the 11-bit range. The IDs are kept
// as the firmware expects them; validation reports them.

fn link_generic2_frames() -> Vec<FrameDefinition> {
    vec![
        FrameDefinition::new(
            0x2000,
            "Engine Data 1",
            "RPM, TPS, ECT, IAT",
            8,
            vec![
                Field::new("rpm", "Engine RPM", (0.0, 15000.0), 800.0, "rpm", 0, Two),
                Field::new("tps", "Throttle Position", (0.0, 100.0), 0.0, "%", 2, Two).scaled(10.0),
                Field::new("coolant", "Coolant Temp", (-40.0, 150.0), 85.0, "C", 4, Two).scaled(10.0),
                Field::new("air_temp", "Air Temp", (-40.0, 80.0), 25.0, "C", 6, Two).scaled(10.0),
            ],
        ),
        FrameDefinition::new(
            0x2001,
            "Engine Data 2",
            "MAP, Battery, Fuel Pressure, Oil Pressure",
            8,
            vec![
                Field::new("map", "MAP", (0.0, 300.0), 100.0, "kPa", 0, Two).scaled(10.0),
                Field::new("battery", "Battery Voltage", (8.0, 18.0), 14.0, "V", 2, Two).scaled(100.0),
                Field::new("fuel_pressure", "Fuel Pressure", (0.0, 10.0), 3.0, "bar", 4, Two).scaled(10.0),
                Field::new("oil_pressure", "Oil Pressure", (0.0, 10.0), 4.0, "bar", 6, Two).scaled(10.0),
            ],
        ),
        FrameDefinition::new(
            0x2002,
            "Engine Data 3",
            "Lambda, Ignition timing, Fuel level",
            6,
            vec![
                Field::new("lambda", "Lambda", (0.5, 1.5), 1.0, "", 0, Two).scaled(100.0),
                Field::new("ign_timing", "Ignition Timing", (-20.0, 60.0), 15.0, "deg", 2, Two)
                    .scaled(10.0)
                    .signed(),
                Field::new("fuel_level", "Fuel Level", (0.0, 100.0), 50.0, "%", 4, Two),
            ],
        ),
        FrameDefinition::new(
            0x2003,
            "Engine Data 4",
            "Boost control, Idle control",
            4,
            vec![
                Field::new("boost_duty", "Boost Duty", (0.0, 100.0), 0.0, "%", 0, Two).scaled(10.0),
                Field::new("idle_duty", "Idle Valve", (0.0, 100.0), 30.0, "%", 2, Two).scaled(10.0),
            ],
        ),
        FrameDefinition::new(
            0x2004,
            "Vehicle Data 1",
            "Speed, Gear, Launch/Flat shift status",
            4,
            vec![
                Field::new("speed", "Vehicle Speed", (0.0, 300.0), 0.0, "km/h", 0, Two).scaled(10.0),
                Field::new("gear", "Gear", (0.0, 8.0), 0.0, "", 2, One),
                Field::flag("launch_control", "Launch Control", false, 3, 0),
                Field::flag("flat_shift", "Flat Shift", false, 3, 1),
            ],
        ),
        FrameDefinition::new(
            0x2005,
            "Vehicle Data 2",
            "Wheel speeds",
            8,
            vec![
                Field::new("wheel_fl", "Wheel FL", (0.0, 300.0), 0.0, "km/h", 0, Two).scaled(10.0),
                Field::new("wheel_fr", "Wheel FR", (0.0, 300.0), 0.0, "km/h", 2, Two).scaled(10.0),
                Field::new("wheel_rl", "Wheel RL", (0.0, 300.0), 0.0, "km/h", 4, Two).scaled(10.0),
                Field::new("wheel_rr", "Wheel RR", (0.0, 300.0), 0.0, "km/h", 6, Two).scaled(10.0),
            ],
        ),
        FrameDefinition::new(
            0x2006,
            "Flags & Warnings",
            "Engine protection flags, warnings",
            2,
            vec![
                Field::flag("rev_limiter", "Rev Limiter", false, 0, 0),
                Field::flag("ignition", "Ignition On", true, 0, 7),
                Field::new("engine_protection", "Engine Protection", (0.0, 1.0), 0.0, "", 1, One),
            ],
        ),
        FrameDefinition::new(
            0x2007,
            "Analog Inputs",
            "User-configurable analog inputs",
            8,
            vec![
                Field::new("an1", "Analog 1", (0.0, 5.0), 0.0, "V", 0, Two).scaled(1000.0),
                Field::new("an2", "Analog 2", (0.0, 5.0), 0.0, "V", 2, Two).scaled(1000.0),
                Field::new("an3", "Analog 3", (0.0, 5.0), 0.0, "V", 4, Two).scaled(1000.0),
                Field::new("an4", "Analog 4", (0.0, 5.0), 0.0, "V", 6, Two).scaled(1000.0),
            ],
        ),
    ]
}
