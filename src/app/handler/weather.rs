use axum::Json;
use chrono::{Days, Local, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const SUMMARIES: [&str; 10] = [
    "Freezing",
    "Bracing",
    "Chilly",
    "Cool",
    "Mild",
    "Warm",
    "Balmy",
    "Hot",
    "Sweltering",
    "Scorching",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherForecast {
    pub date: NaiveDate,
    pub temperature_c: i32,
    pub temperature_f: i32,
    pub summary: String,
}

impl WeatherForecast {
    pub fn new(date: NaiveDate, temperature_c: i32, summary: &str) -> Self {
        Self {
            date,
            temperature_c,
            temperature_f: 32 + (temperature_c as f64 / 0.5556) as i32,
            summary: summary.to_string(),
        }
    }
}

/// Five days of made-up weather starting tomorrow.
pub async fn weather_forecast() -> Json<Vec<WeatherForecast>> {
    let today = Local::now().date_naive();
    let mut rng = rand::rng();

    let forecast = (1..=5)
        .map(|offset| {
            let date = today.checked_add_days(Days::new(offset)).unwrap_or(today);
            let summary = SUMMARIES[rng.random_range(0..SUMMARIES.len())];
            WeatherForecast::new(date, rng.random_range(-20..55), summary)
        })
        .collect();

    Json(forecast)
}
