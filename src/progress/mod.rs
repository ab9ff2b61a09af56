//! Progress tracking for long-running operations.
//!
//! Model loads and generations register a task in the [`TaskRegistry`] and
//! move it through [`Stage`]s. Observers either poll [`TaskRegistry::snapshot`]
//! or follow a task with [`TaskRegistry::subscribe`].

mod registry;

pub use registry::{
    Stage, Subscription, SubscriptionEvent, TaskKind, TaskRegistry, TaskSnapshot,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn registry() -> TaskRegistry {
        TaskRegistry::new(Duration::from_secs(60))
    }

    fn generation() -> TaskKind {
        TaskKind::generation("profile-1", "Hello world")
    }

    // ===========================================
    // Lifecycle tests
    // ===========================================

    #[test]
    fn test_start_task_is_queued() {
        let registry = registry();
        assert!(registry.start_task("t1", generation()));

        let snapshot = registry.snapshot("t1").unwrap();
        assert_eq!(snapshot.stage, Stage::Queued);
        assert_eq!(snapshot.progress, 0);
        assert_eq!(snapshot.error, None);
    }

    #[test]
    fn test_start_task_twice_keeps_live_task() {
        let registry = registry();
        registry.start_task("t1", generation());
        registry.update("t1", Stage::GeneratingAudio, 50);

        assert!(!registry.start_task("t1", generation()));
        assert_eq!(registry.snapshot("t1").unwrap().stage, Stage::GeneratingAudio);
    }

    #[test]
    fn test_stage_regression_is_ignored() {
        let registry = registry();
        registry.start_task("t1", generation());

        assert!(registry.update("t1", Stage::ComputingPrompt, 20));
        assert!(!registry.update("t1", Stage::CheckingCache, 15));

        let snapshot = registry.snapshot("t1").unwrap();
        assert_eq!(snapshot.stage, Stage::ComputingPrompt);
        assert_eq!(snapshot.progress, 20);
    }

    #[test]
    fn test_progress_within_stage_never_decreases() {
        let registry = registry();
        registry.start_task("t1", TaskKind::model_load("1.7B"));

        registry.update("t1", Stage::Downloading, 60);
        registry.update("t1", Stage::Downloading, 40);

        assert_eq!(registry.snapshot("t1").unwrap().progress, 60);
    }

    #[test]
    fn test_progress_is_clamped() {
        let registry = registry();
        registry.start_task("t1", generation());
        registry.update("t1", Stage::Saving, 250);

        assert_eq!(registry.snapshot("t1").unwrap().progress, 100);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let registry = registry();
        registry.start_task("t1", generation());
        registry.update("t1", Stage::GeneratingAudio, 50);

        assert!(registry.fail("t1", "backend exploded"));
        assert!(!registry.complete("t1"));
        assert!(!registry.update("t1", Stage::Saving, 90));

        let snapshot = registry.snapshot("t1").unwrap();
        assert_eq!(snapshot.stage, Stage::Error);
        assert_eq!(snapshot.error.as_deref(), Some("backend exploded"));
        assert_eq!(snapshot.progress, 50);
    }

    #[test]
    fn test_unknown_task_updates_are_rejected() {
        let registry = registry();

        assert!(!registry.update("missing", Stage::Saving, 10));
        assert!(!registry.complete("missing"));
        assert!(!registry.note("missing", "hi"));
        assert!(registry.snapshot("missing").is_none());
    }

    #[test]
    fn test_notes_are_attached() {
        let registry = registry();
        registry.start_task("t1", generation());

        assert!(registry.note("t1", "Using 1.7B instead of 0.6B"));
        assert_eq!(
            registry.snapshot("t1").unwrap().notes,
            vec!["Using 1.7B instead of 0.6B".to_string()]
        );
    }

    #[test]
    fn test_generation_preview_is_truncated() {
        let text = "a".repeat(80);
        let TaskKind::Generation { text_preview, .. } = TaskKind::generation("p", &text) else {
            panic!("expected generation kind");
        };

        assert_eq!(text_preview, format!("{}...", "a".repeat(50)));
    }

    // ===========================================
    // Active task listing and retention
    // ===========================================

    #[test]
    fn test_active_tasks_excludes_finished() {
        let registry = registry();
        registry.start_task("running", generation());
        registry.start_task("done", TaskKind::model_load("0.6B"));
        registry.complete("done");

        let active = registry.active_tasks();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].task_id, "running");
    }

    #[test]
    fn test_finished_tasks_are_pruned_after_retention() {
        let registry = TaskRegistry::new(Duration::ZERO);
        registry.start_task("t1", generation());
        registry.complete("t1");

        assert_eq!(registry.prune(), 1);
        assert!(registry.snapshot("t1").is_none());
    }

    #[test]
    fn test_finished_tasks_retained_within_window() {
        let registry = registry();
        registry.start_task("t1", generation());
        registry.complete("t1");

        assert_eq!(registry.prune(), 0);
        assert_eq!(registry.snapshot("t1").unwrap().stage, Stage::Complete);
    }

    #[test]
    fn test_clear_finished() {
        let registry = registry();
        registry.start_task("a", generation());
        registry.start_task("b", generation());
        registry.start_task("c", generation());
        registry.complete("a");
        registry.fail("b", "nope");

        assert_eq!(registry.clear_finished(), 2);
        assert!(registry.snapshot("c").is_some());
    }

    // ===========================================
    // Subscription tests
    // ===========================================

    #[test]
    fn test_subscribe_after_completion_yields_terminal() {
        let registry = registry();
        registry.start_task("t1", generation());
        registry.update("t1", Stage::GeneratingAudio, 50);
        registry.complete("t1");

        let snapshots: Vec<TaskSnapshot> = registry.subscribe("t1").collect();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].stage, Stage::Complete);
        assert_eq!(snapshots[0].progress, 100);
    }

    #[test]
    fn test_subscribe_unknown_task_is_empty() {
        let registry = registry();
        let subscription = registry.subscribe("ghost");

        assert_eq!(subscription.task_id(), "ghost");
        assert_eq!(subscription.count(), 0);
    }

    #[test]
    fn test_subscribers_are_independent() {
        let registry = registry();
        registry.start_task("t1", generation());
        registry.fail("t1", "boom");

        assert_eq!(registry.subscribe("t1").count(), 1);
        assert_eq!(registry.subscribe("t1").count(), 1);
    }

    #[test]
    fn test_subscription_stages_are_monotonic_and_terminate() {
        let registry = registry();
        registry.start_task("t1", generation());
        let subscription = registry.subscribe("t1");

        let producer = {
            let registry = registry.clone();
            thread::spawn(move || {
                let stages = [
                    (Stage::LoadingModel, 5),
                    (Stage::CheckingCache, 15),
                    (Stage::ComputingPrompt, 20),
                    (Stage::CheckingCache, 30),
                    (Stage::GeneratingAudio, 50),
                    (Stage::Saving, 90),
                ];
                for (stage, progress) in stages {
                    registry.update("t1", stage, progress);
                    thread::sleep(Duration::from_millis(5));
                }
                registry.complete("t1");
            })
        };

        let observed: Vec<Stage> = subscription.map(|s| s.stage).collect();
        producer.join().unwrap();

        assert!(observed.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(observed.last(), Some(&Stage::Complete));
        assert_eq!(observed.iter().filter(|s| s.is_terminal()).count(), 1);
    }

    #[test]
    fn test_next_timeout_on_idle_task() {
        let registry = registry();
        registry.start_task("t1", generation());
        let mut subscription = registry.subscribe("t1");

        // Current state first, then nothing new.
        assert!(matches!(
            subscription.next_timeout(Duration::from_millis(10)),
            SubscriptionEvent::Update(_)
        ));
        assert_eq!(
            subscription.next_timeout(Duration::from_millis(10)),
            SubscriptionEvent::TimedOut
        );

        registry.complete("t1");
        assert!(matches!(
            subscription.next_timeout(Duration::from_millis(10)),
            SubscriptionEvent::Update(ref s) if s.stage == Stage::Complete
        ));
        assert_eq!(
            subscription.next_timeout(Duration::from_millis(10)),
            SubscriptionEvent::Ended
        );
    }

    #[test]
    fn test_dropped_subscription_does_not_affect_task() {
        let registry = registry();
        registry.start_task("t1", generation());

        {
            let mut subscription = registry.subscribe("t1");
            subscription.next();
        }

        assert!(registry.update("t1", Stage::GeneratingAudio, 50));
        assert!(registry.complete("t1"));
    }
}
