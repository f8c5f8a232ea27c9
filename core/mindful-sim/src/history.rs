//! Prints stored sessions, newest first.

use mindful_core::{summarize, Baselines, Session, SessionStore, SignalType};

use crate::run::SimError;

pub fn print(store: &dyn SessionStore, baselines: &Baselines) -> Result<(), SimError> {
    let sessions = store.load_all()?;
    if sessions.is_empty() {
        println!("No sessions recorded");
        return Ok(());
    }

    println!(
        "{:<28} {:<20} {:>8} {:>8} {:>8} {:>9}",
        "SESSION", "STARTED", "MINUTES", "SAMPLES", "HR AVG", "HRV DELTA"
    );
    for session in &sessions {
        println!("{}", row(session, baselines));
    }
    Ok(())
}

fn row(session: &Session, baselines: &Baselines) -> String {
    let summary = summarize(session, baselines);
    let heart_rate = summary
        .stats(SignalType::HeartRate)
        .map(|s| format!("{:.0}", s.average))
        .unwrap_or_else(|| "-".to_string());
    let hrv_change = summary
        .hrv_change
        .map(|c| format!("{:+.1}", c))
        .unwrap_or_else(|| "-".to_string());
    let state = if session.is_sealed() { "" } else { " (open)" };

    format!(
        "{:<28} {:<20} {:>8.1} {:>8} {:>8} {:>9}{}",
        session.id(),
        session.start_date().format("%Y-%m-%d %H:%M:%S"),
        summary.duration_secs / 60.0,
        summary.total_samples,
        heart_rate,
        hrv_change,
        state
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn open_session_row_is_marked() {
        let session = Session::new(Utc.with_ymd_and_hms(2026, 4, 2, 6, 0, 0).unwrap());
        let line = row(&session, &Baselines::default());
        assert!(line.contains("2026-04-02 06:00:00"));
        assert!(line.ends_with("(open)"));
    }
}
