pub mod api;
pub mod api_doc;
pub mod auth;
pub mod server;

pub use auth::AppState;
pub use server::{router, run_server};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Datelike, Timelike, Utc};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    use crate::config::Config;
    use crate::engine::Engine;
    use crate::predict::elements::tests::iss;

    use super::auth::AppState;

    /// The ISS elements re-stamped with an epoch at `now`.
    pub(crate) fn current_iss_text(now: DateTime<Utc>) -> String {
        let mut state = iss();
        state.epoch_year = now.year();
        state.epoch_day =
            now.ordinal() as f64 + now.num_seconds_from_midnight() as f64 / 86_400.0;
        let (line1, line2) = state.to_tle_lines();
        format!("ISS (ZARYA)\n{line1}\n{line2}\n")
    }

    pub(crate) fn config() -> Config {
        let tle_file = std::env::temp_dir().join(format!("pass-o-mat-web-{}.txt", std::process::id()));
        let yaml = format!(
            r#"
station:
  name: Moscow
  coordinates: "55.75,37.62"
  altitude_m: 150
  min_elevation_deg: 10
satellite:
  tle_file: "{}"
predict:
  lookahead: 1day
api_keys:
  - key: viewer-key
    name: viewer
    permissions: [view_passes]
  - key: admin-key
    name: admin
    permissions: [view_passes, submit_elements]
"#,
            tle_file.display()
        );
        Config::from_yaml(&yaml).unwrap()
    }

    pub(crate) fn state() -> AppState {
        let config = config();
        let engine = Engine::new(
            config.station().unwrap(),
            config.pass_search(),
            config.predict.shift_tolerance,
        )
        .with_lookahead(config.predict.lookahead);
        AppState {
            config: Arc::new(config),
            engine: Arc::new(Mutex::new(engine)),
        }
    }
}
