//! Configuration validation

use crate::schema::{RawChild, RawConfig, RawDevice, RawDowntime, RawWindow};
use chrono::Weekday;
use chrono_tz::Tz;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Child '{child_id}': {message}")]
    ChildError { child_id: String, message: String },

    #[error("Device '{device_id}': {message}")]
    DeviceError { device_id: String, message: String },

    #[error("Duplicate child ID: {0}")]
    DuplicateChildId(String),

    #[error("Duplicate device ID: {0}")]
    DuplicateDeviceId(String),

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("Invalid day specification: {0}")]
    InvalidDaySpec(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(tz) = &config.service.timezone
        && tz.parse::<Tz>().is_err()
    {
        errors.push(ValidationError::UnknownTimezone(tz.clone()));
    }

    if config.service.tick_interval_seconds == Some(0) {
        errors.push(ValidationError::GlobalError(
            "tick_interval_seconds must be greater than 0".into(),
        ));
    }

    if config.service.driver_timeout_seconds == Some(0) {
        errors.push(ValidationError::GlobalError(
            "driver_timeout_seconds must be greater than 0".into(),
        ));
    }

    if let Some(downtime) = &config.downtime {
        errors.extend(validate_downtime(downtime));
    }

    let mut seen_children = HashSet::new();
    for child in &config.children {
        if !seen_children.insert(&child.id) {
            errors.push(ValidationError::DuplicateChildId(child.id.clone()));
        }
        errors.extend(validate_child(child));
    }

    let mut seen_devices = HashSet::new();
    for device in &config.devices {
        if !seen_devices.insert(&device.id) {
            errors.push(ValidationError::DuplicateDeviceId(device.id.clone()));
        }
        errors.extend(validate_device(device));
    }

    errors
}

fn validate_child(child: &RawChild) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: &str| {
        errors.push(ValidationError::ChildError {
            child_id: child.id.clone(),
            message: message.into(),
        })
    };

    if child.id.trim().is_empty() {
        push("id cannot be empty");
    }

    match (child.break_after_minutes, child.break_minutes) {
        (Some(0), _) => push("break_after_minutes must be greater than 0"),
        (Some(_), Some(0)) => push("break_minutes must be greater than 0"),
        (Some(_), None) | (None, Some(_)) => {
            push("break_after_minutes and break_minutes must be set together")
        }
        _ => {}
    }

    errors
}

fn validate_device(device: &RawDevice) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if device.id.trim().is_empty() {
        errors.push(ValidationError::DeviceError {
            device_id: device.id.clone(),
            message: "id cannot be empty".into(),
        });
    }
    if device.driver.trim().is_empty() {
        errors.push(ValidationError::DeviceError {
            device_id: device.id.clone(),
            message: "driver cannot be empty".into(),
        });
    }

    errors
}

fn validate_downtime(downtime: &RawDowntime) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    match (&downtime.start, &downtime.end) {
        (Some(start), Some(end)) => {
            errors.extend(validate_time(start));
            errors.extend(validate_time(end));
        }
        (None, None) => {}
        _ => errors.push(ValidationError::GlobalError(
            "downtime start and end must be set together".into(),
        )),
    }

    for window in [&downtime.weekday, &downtime.weekend].into_iter().flatten() {
        errors.extend(validate_window(window));
    }

    for (day, window) in &downtime.days {
        if let Err(e) = parse_weekday(day) {
            errors.push(ValidationError::InvalidDaySpec(e));
        }
        errors.extend(validate_window(window));
    }

    errors
}

fn validate_window(window: &RawWindow) -> Vec<ValidationError> {
    let mut errors = validate_time(&window.start);
    errors.extend(validate_time(&window.end));
    errors
}

fn validate_time(value: &str) -> Vec<ValidationError> {
    match parse_time(value) {
        Ok(_) => Vec::new(),
        Err(message) => vec![ValidationError::InvalidTimeFormat {
            value: value.to_string(),
            message,
        }],
    }
}

/// Parse HH:MM time format
pub fn parse_time(s: &str) -> Result<(u8, u8), String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        return Err("Expected HH:MM format".into());
    }

    let hour: u8 = parts[0]
        .parse()
        .map_err(|_| "Invalid hour".to_string())?;
    let minute: u8 = parts[1]
        .parse()
        .map_err(|_| "Invalid minute".to_string())?;

    if hour >= 24 {
        return Err("Hour must be 0-23".into());
    }
    if minute >= 60 {
        return Err("Minute must be 0-59".into());
    }

    Ok((hour, minute))
}

/// Parse a day name ("mon", "Monday", ...)
pub fn parse_weekday(day: &str) -> Result<Weekday, String> {
    match day.to_lowercase().as_str() {
        "mon" | "monday" => Ok(Weekday::Mon),
        "tue" | "tuesday" => Ok(Weekday::Tue),
        "wed" | "wednesday" => Ok(Weekday::Wed),
        "thu" | "thursday" => Ok(Weekday::Thu),
        "fri" | "friday" => Ok(Weekday::Fri),
        "sat" | "saturday" => Ok(Weekday::Sat),
        "sun" | "sunday" => Ok(Weekday::Sun),
        other => Err(format!("Unknown day: {}", other)),
    }
}
