//! Windowed execution: at most `max_concurrent` units in flight, and the
//! next window starts only after every unit of the previous one settled.

use std::future::Future;

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::events::RunObserver;
use crate::fal::FalError;
use crate::plan::PromptUnit;
use crate::results::{PendingResult, ResultStore};

use super::{RunState, UnitFailure};

/// Executes `units` in contiguous windows of `max_concurrent` and aggregates
/// every settlement into the store, counters and observer. Sequence ids are
/// assigned here, in window order, so they stay gap-free however the units
/// fared. Returns the failures in plan order.
pub(crate) async fn run_windows<F, Fut>(
    units: Vec<PromptUnit>,
    max_concurrent: usize,
    state: &RunState,
    store: &Mutex<ResultStore>,
    observer: &RunObserver,
    run_unit: F,
) -> Vec<UnitFailure>
where
    F: Fn(usize, PromptUnit) -> Fut,
    Fut: Future<Output = Result<PendingResult, FalError>>,
{
    let total = units.len();
    let indexed: Vec<(usize, PromptUnit)> = units.into_iter().enumerate().collect();
    let mut failures = Vec::new();

    for window in indexed.chunks(max_concurrent) {
        // Cooperative stop: honored between windows, never mid-flight.
        if state.stop_requested() {
            break;
        }

        let settled = join_all(
            window
                .iter()
                .map(|(index, unit)| run_unit(*index, unit.clone())),
        )
        .await;

        // join_all preserves input order, so outcomes line up with the window.
        for ((index, _), outcome) in window.iter().zip(settled) {
            let position = index + 1;
            match outcome {
                Ok(pending) => {
                    let id = store.lock().await.push(pending);
                    state.record_success();
                    observer.success(format!("#{id} complete"));
                }
                Err(e) => {
                    state.record_failure();
                    observer.error(format!("{position} failed: {e}"));
                    failures.push(UnitFailure {
                        position,
                        reason: e.to_string(),
                    });
                }
            }
            let (completed, failed) = state.counts();
            observer.progress(
                completed + failed,
                total,
                format!("{completed}/{total} done"),
            );
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::events::{LogLevel, ProgressUpdate};
    use crate::plan::GenerationMode;
    use crate::results::ResultKind;

    fn image_units(n: usize) -> Vec<PromptUnit> {
        (0..n)
            .map(|i| PromptUnit::Image {
                prompt: format!("prompt {i}"),
            })
            .collect()
    }

    fn pending_for(unit: &PromptUnit) -> PendingResult {
        let prompt = match unit {
            PromptUnit::Image { prompt } => prompt.clone(),
            PromptUnit::Pair { base_prompt, .. } => base_prompt.clone(),
        };
        PendingResult {
            mode: GenerationMode::Single,
            text: prompt.clone(),
            kind: ResultKind::Image {
                url: "https://cdn.example/i.png".to_string(),
                prompt,
            },
        }
    }

    fn remote_error(message: &str) -> FalError {
        FalError::Api {
            endpoint: "fal-ai/nano-banana-pro".to_string(),
            status: 422,
            message: message.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_never_exceeds_the_window_size() {
        let state = RunState::default();
        assert!(state.begin());
        let store = Mutex::new(ResultStore::new());
        let observer = RunObserver::new();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let failures = run_windows(image_units(7), 3, &state, &store, &observer, |_, unit| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(25)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(pending_for(&unit))
            }
        })
        .await;

        assert!(failures.is_empty());
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(store.lock().await.len(), 7);
        assert_eq!(state.counts(), (7, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn window_settles_fully_before_the_next_starts() {
        let state = RunState::default();
        assert!(state.begin());
        let store = Mutex::new(ResultStore::new());
        let observer = RunObserver::new();

        let events: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();

        run_windows(image_units(4), 2, &state, &store, &observer, |index, unit| {
            let events = events.clone();
            async move {
                events.lock().unwrap().push(format!("start-{index}"));
                // Uneven durations: the slow unit pins the window open.
                let delay = if index % 2 == 0 { 30 } else { 10 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                events.lock().unwrap().push(format!("end-{index}"));
                Ok(pending_for(&unit))
            }
        })
        .await;

        let events = events.lock().unwrap();
        let at = |name: &str| {
            events
                .iter()
                .position(|e| e == name)
                .unwrap_or_else(|| panic!("missing event {name} in {events:?}"))
        };
        assert!(at("end-0") < at("start-2"));
        assert!(at("end-1") < at("start-2"));

        // Ids follow plan order even though unit 1 finished before unit 0.
        let texts: Vec<String> = store
            .lock()
            .await
            .items()
            .iter()
            .map(|i| i.text.clone())
            .collect();
        assert_eq!(texts, ["prompt 0", "prompt 1", "prompt 2", "prompt 3"]);
    }

    #[tokio::test]
    async fn stop_lets_the_window_settle_and_schedules_nothing_more() {
        let state = RunState::default();
        assert!(state.begin());
        let store = Mutex::new(ResultStore::new());
        let observer = RunObserver::new();

        let started: Arc<std::sync::Mutex<Vec<usize>>> = Arc::default();

        run_windows(image_units(6), 2, &state, &store, &observer, |index, unit| {
            started.lock().unwrap().push(index);
            if index == 1 {
                state.request_stop();
            }
            async move { Ok(pending_for(&unit)) }
        })
        .await;

        // Both units of the first window ran and were recorded; the second
        // window never started.
        assert_eq!(*started.lock().unwrap(), vec![0, 1]);
        assert_eq!(store.lock().await.len(), 2);
        assert_eq!(state.counts(), (2, 0));
    }

    #[tokio::test]
    async fn one_failure_leaves_the_rest_of_the_window_intact() {
        let state = RunState::default();
        assert!(state.begin());
        let store = Mutex::new(ResultStore::new());

        let logs: Arc<std::sync::Mutex<Vec<(LogLevel, String)>>> = Arc::default();
        let updates: Arc<std::sync::Mutex<Vec<ProgressUpdate>>> = Arc::default();
        let observer = RunObserver::new()
            .with_log({
                let logs = logs.clone();
                move |level, msg| logs.lock().unwrap().push((level, msg))
            })
            .with_progress({
                let updates = updates.clone();
                move |u| updates.lock().unwrap().push(u)
            });

        let failures = run_windows(image_units(4), 4, &state, &store, &observer, |index, unit| {
            async move {
                if index == 1 {
                    Err(remote_error("bad prompt"))
                } else {
                    Ok(pending_for(&unit))
                }
            }
        })
        .await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].position, 2);
        assert!(failures[0].reason.contains("bad prompt"));
        assert_eq!(state.counts(), (3, 1));

        // The failed slot never consumed a sequence id.
        let ids: Vec<String> = store
            .lock()
            .await
            .items()
            .iter()
            .map(|i| i.id.clone())
            .collect();
        assert_eq!(ids, ["0001", "0002", "0003"]);

        let logs = logs.lock().unwrap();
        assert!(logs
            .iter()
            .any(|(level, msg)| *level == LogLevel::Error && msg.starts_with("2 failed:")));

        let updates = updates.lock().unwrap();
        assert_eq!(
            updates.last(),
            Some(&ProgressUpdate {
                done: 4,
                total: 4,
                status: "3/4 done".to_string()
            })
        );
    }

    #[tokio::test]
    async fn no_units_means_no_work_and_no_events() {
        let state = RunState::default();
        assert!(state.begin());
        let store = Mutex::new(ResultStore::new());

        let updates: Arc<std::sync::Mutex<Vec<ProgressUpdate>>> = Arc::default();
        let observer = RunObserver::new().with_progress({
            let updates = updates.clone();
            move |u| updates.lock().unwrap().push(u)
        });

        let failures = run_windows(Vec::new(), 3, &state, &store, &observer, |_, unit| {
            async move { Ok(pending_for(&unit)) }
        })
        .await;

        assert!(failures.is_empty());
        assert!(store.lock().await.is_empty());
        assert!(updates.lock().unwrap().is_empty());
    }
}
