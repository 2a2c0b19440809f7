//! Weather ensemble collector.
//!
//! Pulls per-member hourly 2m temperatures from the open-meteo ensemble
//! endpoint (deterministic forecast as fallback) and reduces each member
//! to a daily max over the measurement window.
//!
//! Measurement window rule: on DST days the day runs `[01:00, next-day
//! 01:00)` local, on standard-time days `[00:00, next-day 00:00)`. The
//! settlement source measures this way; deviating breaks calibration.

use crate::domain::models::WeatherEnsembleSample;
use crate::infrastructure::config::Settings;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

const ENSEMBLE_URL: &str = "https://api.open-meteo.com/v1/ensemble";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// The half-open local window whose max defines the day's high.
pub fn measurement_window(target_date: NaiveDate, tz: Tz) -> Option<(DateTime<Tz>, DateTime<Tz>)> {
    let noon = tz
        .from_local_datetime(&target_date.and_hms_opt(12, 0, 0)?)
        .earliest()?;
    let start_hour = if noon.offset().dst_offset() != ChronoDuration::zero() {
        1
    } else {
        0
    };
    let start = tz
        .from_local_datetime(&target_date.and_hms_opt(start_hour, 0, 0)?)
        .earliest()?;
    let next_day = target_date.succ_opt()?;
    let end = tz
        .from_local_datetime(&next_day.and_hms_opt(start_hour, 0, 0)?)
        .earliest()?;
    Some((start, end))
}

/// Max of the hourly readings that fall inside the measurement window.
pub fn extract_daily_max(
    hourly_values: &[Option<f64>],
    hourly_times: &[String],
    target_date: NaiveDate,
    tz_name: &str,
) -> Option<f64> {
    let tz: Tz = tz_name.parse().ok()?;
    let (start, end) = measurement_window(target_date, tz)?;
    let mut day_max: Option<f64> = None;
    for (idx, time_value) in hourly_times.iter().enumerate() {
        let local = match parse_local_time(time_value, tz) {
            Some(local) => local,
            None => continue,
        };
        if local < start || local >= end {
            continue;
        }
        let reading = match hourly_values.get(idx).copied().flatten() {
            Some(reading) => reading,
            None => continue,
        };
        day_max = Some(day_max.map_or(reading, |current: f64| current.max(reading)));
    }
    day_max
}

fn parse_local_time(value: &str, tz: Tz) -> Option<DateTime<Tz>> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    tz.from_local_datetime(&naive).earliest()
}

/// Fold a member series key into a model family name.
fn model_from_member_key(member_key: &str) -> String {
    let normalized = member_key.to_lowercase();
    if normalized == "temperature_2m" {
        return "best_match".to_string();
    }
    if normalized.contains("gfs") {
        return "gfs_ensemble".to_string();
    }
    if normalized.contains("ecmwf") {
        return "ecmwf_ensemble".to_string();
    }
    if normalized.contains("icon") {
        return "icon".to_string();
    }
    if normalized.contains("gem") {
        return "gem".to_string();
    }
    "ensemble".to_string()
}

/// Map ensemble model ids onto their deterministic counterparts for the
/// fallback endpoint.
fn forecast_models_from_ensemble_models(models: &[String]) -> String {
    let mut mapped: Vec<String> = Vec::new();
    for model in models {
        let normalized = model.trim().to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        let deterministic = match normalized.as_str() {
            "gfs_ensemble" => "gfs_seamless".to_string(),
            "ecmwf_ifs025_ensemble" => "ecmwf_ifs025".to_string(),
            other => other.replace("_ensemble", ""),
        };
        if !mapped.contains(&deterministic) {
            mapped.push(deterministic);
        }
    }
    if mapped.is_empty() {
        mapped = vec![
            "best_match".to_string(),
            "gfs_seamless".to_string(),
            "ecmwf_ifs025".to_string(),
        ];
    }
    mapped.join(",")
}

/// Collect one sample per ensemble member for today's local date.
pub async fn fetch_weather_ensemble_samples(
    settings: &Settings,
    http: &reqwest::Client,
    now_utc: DateTime<Utc>,
) -> Vec<WeatherEnsembleSample> {
    let tz: Tz = match settings.weather.timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = %settings.weather.timezone, "weather_timezone_invalid");
            return Vec::new();
        }
    };
    let target_date = now_utc.with_timezone(&tz).date_naive();

    let latitude = settings.weather.latitude.to_string();
    let longitude = settings.weather.longitude.to_string();
    let forecast_days = settings.weather.forecast_days.to_string();
    let ensemble_models = settings.weather.ensemble_models.join(",");
    let forecast_models =
        forecast_models_from_ensemble_models(&settings.weather.ensemble_models);

    let attempts = [
        (ENSEMBLE_URL, ensemble_models),
        (FORECAST_URL, forecast_models),
    ];
    let mut payload: Option<Value> = None;
    for (endpoint, models) in &attempts {
        let params = [
            ("latitude", latitude.as_str()),
            ("longitude", longitude.as_str()),
            ("hourly", "temperature_2m"),
            ("temperature_unit", "fahrenheit"),
            ("models", models.as_str()),
            ("forecast_days", forecast_days.as_str()),
            ("timezone", settings.weather.timezone.as_str()),
        ];
        let response = http
            .get(*endpoint)
            .query(&params)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => {
                match response.json::<Value>().await {
                    Ok(candidate) if candidate.is_object() => {
                        payload = Some(candidate);
                        break;
                    }
                    Ok(_) => warn!(endpoint = %endpoint, "open_meteo_non_object_payload"),
                    Err(e) => warn!(endpoint = %endpoint, error = %e, "open_meteo_decode_failed"),
                }
            }
            Ok(response) => {
                warn!(endpoint = %endpoint, status = %response.status(), "open_meteo_request_failed");
            }
            Err(e) => warn!(endpoint = %endpoint, error = %e, "open_meteo_request_failed"),
        }
    }
    // Degrade gracefully; the rest of the tick can still run.
    let payload = match payload {
        Some(payload) => payload,
        None => return Vec::new(),
    };

    extract_samples(&payload, target_date, &settings.weather.timezone, now_utc)
}

/// Pull `(member, daily max)` samples out of an hourly payload.
pub(crate) fn extract_samples(
    payload: &Value,
    target_date: NaiveDate,
    tz_name: &str,
    collected_at: DateTime<Utc>,
) -> Vec<WeatherEnsembleSample> {
    let hourly = match payload.get("hourly").and_then(Value::as_object) {
        Some(hourly) => hourly,
        None => return Vec::new(),
    };
    let times: Vec<String> = match hourly.get("time").and_then(Value::as_array) {
        Some(times) if !times.is_empty() => times
            .iter()
            .filter_map(|t| t.as_str().map(str::to_string))
            .collect(),
        _ => return Vec::new(),
    };

    let mut samples = Vec::new();
    for (member_key, values) in hourly {
        if member_key == "time" || !member_key.to_lowercase().starts_with("temperature_2m") {
            continue;
        }
        let values = match values.as_array() {
            Some(values) if values.len() == times.len() => values,
            _ => continue,
        };
        let readings: Vec<Option<f64>> = values.iter().map(Value::as_f64).collect();
        let day_max = match extract_daily_max(&readings, &times, target_date, tz_name) {
            Some(day_max) => day_max,
            None => continue,
        };
        samples.push(WeatherEnsembleSample {
            collected_at,
            target_date,
            model: model_from_member_key(member_key),
            member: member_key.clone(),
            max_temp_f: day_max,
            source: "open-meteo".to_string(),
        });
    }
    samples
}
