//! Analyzer/alert configuration.

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub enabled: bool,
    pub error_spike_threshold: usize,
    pub error_spike_window_secs: f64,
    pub slow_response_multiplier: f64,
    pub channels: Vec<String>,
    pub webhook_url: Option<String>,
    pub slack_token: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            error_spike_threshold: 10,
            error_spike_window_secs: 60.0,
            slow_response_multiplier: 3.0,
            channels: vec!["console".to_string()],
            webhook_url: None,
            slack_token: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileAlertConfig {
    pub enabled: Option<bool>,
    pub error_spike_threshold: Option<usize>,
    pub error_spike_window_secs: Option<f64>,
    pub slow_response_multiplier: Option<f64>,
    pub channels: Option<Vec<String>>,
    pub webhook_url: Option<String>,
    pub slack_token: Option<String>,
}

impl AlertConfig {
    pub fn from_file(file: Option<FileAlertConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            error_spike_threshold: file
                .error_spike_threshold
                .unwrap_or(defaults.error_spike_threshold),
            error_spike_window_secs: file
                .error_spike_window_secs
                .unwrap_or(defaults.error_spike_window_secs),
            slow_response_multiplier: file
                .slow_response_multiplier
                .unwrap_or(defaults.slow_response_multiplier),
            channels: file.channels.unwrap_or(defaults.channels),
            webhook_url: file.webhook_url.or(defaults.webhook_url),
            slack_token: file.slack_token.or(defaults.slack_token),
        }
    }
}
