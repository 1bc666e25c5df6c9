use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::models::{HistoricalSession, SessionReport};
use crate::session::SessionController;

/// Starts a session, prints a line per snapshot change until `until`
/// resolves, then stops and returns the final report.
pub async fn watch_session<F>(controller: &SessionController, until: F) -> Result<SessionReport>
where
    F: Future<Output = ()>,
{
    let mut updates = controller.subscribe();
    controller
        .start_session()
        .await
        .context("Failed to start monitoring session")?;

    let mut last_line = String::new();
    tokio::pin!(until);

    loop {
        tokio::select! {
            _ = &mut until => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = updates.borrow_and_update().status_line();
                if line != last_line {
                    println!("{line}");
                    last_line = line;
                }
            }
        }
    }

    controller
        .stop_session()
        .await
        .context("Failed to stop monitoring session")
}

pub async fn list_history(controller: &SessionController) -> Result<Vec<HistoricalSession>> {
    controller
        .history()
        .await
        .context("Failed to fetch session history")
}

/// Polls history every `every` until `until` resolves, handing each session
/// not seen before to `emit`.
pub async fn follow_history<F>(
    controller: &SessionController,
    every: Duration,
    until: F,
    mut emit: impl FnMut(&HistoricalSession),
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let poller = controller.history_poller(every);
    let mut updates = poller.subscribe();
    let mut seen = BTreeSet::new();
    tokio::pin!(until);

    loop {
        tokio::select! {
            _ = &mut until => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let sessions = updates.borrow_and_update().clone();
                for session in sessions.iter().filter(|s| seen.insert(s.start_time)) {
                    emit(session);
                }
            }
        }
    }

    poller.stop().await;
    Ok(())
}

pub fn history_line(session: &HistoricalSession) -> String {
    let end = session
        .end_time
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".into());
    let mut line = format!(
        "{}  ->  {}  ({})",
        session.start_time.to_rfc3339(),
        end,
        session.elapsed_formatted()
    );
    if let Some(stats) = &session.posture_statistics {
        if let Some(sit) = &stats.dominant_sit {
            line.push_str(&format!("  sit: {sit}"));
        }
        if let Some(spine) = &stats.dominant_spine {
            line.push_str(&format!("  spine: {spine}"));
        }
    }
    line
}

pub fn report_lines(report: &SessionReport) -> Vec<String> {
    let mut lines = vec![
        format!("session {} (generation {})", report.id, report.generation),
        format!(
            "duration {} (backend: {})",
            report.elapsed_formatted,
            report.backend_duration.as_deref().unwrap_or("-")
        ),
        format!("statistics source: {:?}", report.statistics_source),
    ];
    for (name, family) in [("sit", &report.statistics.sit), ("spine", &report.statistics.spine)] {
        let shares: Vec<String> = family
            .percentages
            .iter()
            .map(|(label, pct)| format!("{label} {pct:.1}%"))
            .collect();
        lines.push(format!(
            "{name}: dominant {} [{}]",
            family.dominant.as_deref().unwrap_or("-"),
            shares.join(", ")
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryDuration, PostureStatistics};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_history_line() {
        let session = HistoricalSession {
            start_time: Utc.with_ymd_and_hms(2024, 11, 2, 3, 0, 0).unwrap(),
            end_time: None,
            duration: Some(HistoryDuration {
                hours: 0,
                minutes: 12,
                seconds: 7,
                total_seconds: None,
            }),
            posture_statistics: Some(PostureStatistics {
                dominant_sit: Some("good".into()),
                ..PostureStatistics::default()
            }),
        };
        assert_eq!(
            history_line(&session),
            "2024-11-02T03:00:00+00:00  ->  -  (00:12:07)  sit: good"
        );
    }
}
