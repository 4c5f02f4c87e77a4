mod common;

use chrono::{Duration, Offset, Utc};
use common::{items, noon, unsubscribe, Harness, USER};
use inbox_triage_core::achievements::AchievementId;
use inbox_triage_core::domain::day_key;
use inbox_triage_core::session::remove_session;
use inbox_triage_core::{
    Clock, DecisionAction, FetchFailure, LedgerError, LedgerStore, LedgerWrite, MergeOutcome, PlayerProfile, PortError,
    ProfileReconciler, RewardEngine, SessionPhase,
};

fn unlocked(harness: &Harness, id: AchievementId) -> bool {
    harness.controller.unlocks().iter().any(|u| u.achievement == id)
}

#[tokio::test]
async fn test_start_opens_session_and_counts_the_day() {
    let mut harness = Harness::new(USER);
    harness.start_with(3).await;

    assert_eq!(harness.controller.phase(), &SessionPhase::Active);
    assert_eq!(harness.controller.current_item().map(|i| i.id.as_str()), Some("msg-0"));

    let session = harness.controller.session().unwrap().clone();
    assert_eq!(session.target_count, 3);
    assert_eq!(harness.store.session(session.id).await.unwrap(), session);

    let today = day_key(harness.clock.now(), Utc.fix());
    let day = harness.store.daily_activity(USER, today).await.unwrap().unwrap();
    assert_eq!(day.sessions_started, 1);
    assert_eq!(day.processed, 0);
}

#[tokio::test]
async fn test_empty_batch_is_a_retryable_error() {
    let mut harness = Harness::new(USER);

    let err = harness.controller.start().await.unwrap_err();
    assert!(matches!(err, LedgerError::Fetch(FetchFailure::EmptyBatch)));
    assert!(err.is_retryable());
    assert_eq!(harness.controller.phase(), &SessionPhase::Errored(FetchFailure::EmptyBatch));

    harness.source.push_failure("connection reset");
    let err = harness.controller.start().await.unwrap_err();
    assert!(matches!(err, LedgerError::Fetch(FetchFailure::Failed(_))));

    harness.start_with(2).await;
    assert_eq!(harness.controller.phase(), &SessionPhase::Active);
}

#[tokio::test]
async fn test_only_the_current_item_can_be_decided() {
    let mut harness = Harness::new(USER);
    harness.start_with(3).await;

    let err = harness
        .controller
        .record_decision("msg-2", DecisionAction::Keep)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnexpectedItem(id) if id == "msg-2"));
    assert_eq!(harness.controller.cursor(), 0);

    let err = harness.controller.reset().unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_session_counters_match_their_decisions() {
    let mut harness = Harness::new(USER);
    harness.start_with(6).await;

    let actions = [unsubscribe(), DecisionAction::Keep, unsubscribe(), unsubscribe(), DecisionAction::Keep];
    for (n, action) in actions.iter().enumerate() {
        harness
            .controller
            .record_decision(&format!("msg-{n}"), action.clone())
            .await
            .unwrap();
    }

    let session = harness.controller.session().unwrap();
    assert_eq!(session.unsubscribe_count, 3);
    assert_eq!(session.keep_count, 2);
    assert_eq!(session.total_decisions() as usize, session.decisions.len());
    assert_eq!(session.points_earned, session.decisions.iter().map(|d| u64::from(d.points)).sum::<u64>());
    assert_eq!(session.points_earned, 3 * 10 + 2 * 5);
    assert_eq!(session.xp_earned, 3 * 15 + 2 * 5);
    assert!(!session.is_completed);

    let profile = harness.controller.profile().unwrap();
    assert_eq!(profile.total_xp, 55);
    assert_eq!(profile.lifetime_unsubscribes, 3);
    assert_eq!(profile.lifetime_keeps, 2);
}

#[tokio::test]
async fn test_last_decision_completes_the_session() {
    let mut harness = Harness::new(USER);
    harness.start_with(2).await;

    let first = harness.controller.record_decision("msg-0", DecisionAction::Keep).await.unwrap();
    assert!(!first.completed);
    assert!(first.unlocks.iter().any(|e| e.achievement == AchievementId::FirstDecision));

    let last = harness.controller.record_decision("msg-1", DecisionAction::Keep).await.unwrap();
    assert!(last.completed);
    assert!(last.unlocks.iter().any(|e| e.achievement == AchievementId::FirstSession));
    assert_eq!(harness.controller.phase(), &SessionPhase::Completed);
    assert!(harness.controller.current_item().is_none());

    let stored = harness.stored_profile().await;
    assert_eq!(stored.total_sessions_completed, 1);
    assert_eq!(stored.current_streak, 1);
    assert_eq!(stored.longest_streak, 1);
    // Two keeps plus the first_decision and first_session bonuses.
    assert_eq!(stored.total_points, 10 + 10 + 25);
    assert!(harness.store.session(harness.controller.session().unwrap().id).await.unwrap().is_completed);
}

#[tokio::test]
async fn test_skipping_the_last_item_completes_without_a_decision() {
    let mut harness = Harness::new(USER);
    harness.start_with(2).await;

    harness.controller.record_decision("msg-0", unsubscribe()).await.unwrap();
    let advanced = harness.controller.skip("msg-1").await.unwrap();

    assert!(advanced.completed);
    assert_eq!(harness.controller.session().unwrap().total_decisions(), 1);
    assert_eq!(harness.stored_profile().await.total_sessions_completed, 1);
}

#[tokio::test]
async fn test_tenth_unsubscribe_unlocks_declutterer() {
    let mut harness = Harness::new(USER);
    harness.start_with(12).await;

    for n in 0..9 {
        let recorded = harness
            .controller
            .record_decision(&format!("msg-{n}"), unsubscribe())
            .await
            .unwrap();
        assert!(!recorded.unlocks.iter().any(|e| e.achievement == AchievementId::Unsubscribes10));
    }
    assert!(unlocked(&harness, AchievementId::FirstDecision));
    assert!(!unlocked(&harness, AchievementId::Unsubscribes10));

    let tenth = harness.controller.record_decision("msg-9", unsubscribe()).await.unwrap();
    let events: Vec<_> = tenth.unlocks.iter().map(|e| e.achievement).collect();
    assert_eq!(events, vec![AchievementId::Unsubscribes10]);

    let stored = harness.store.unlocks_for(USER).await.unwrap();
    assert_eq!(stored.iter().filter(|u| u.achievement == AchievementId::Unsubscribes10).count(), 1);
}

#[tokio::test]
async fn test_clean_sweep_needs_five_decisions() {
    let mut harness = Harness::new(USER);
    harness.start_with(4).await;
    harness.decide_all(unsubscribe()).await;
    assert!(!unlocked(&harness, AchievementId::CleanSweep));

    harness.start_with(5).await;
    harness.decide_all(unsubscribe()).await;
    assert!(unlocked(&harness, AchievementId::CleanSweep));
    assert!(!unlocked(&harness, AchievementId::Curator));
}

#[tokio::test]
async fn test_curator_requires_every_decision_kept() {
    let mut harness = Harness::new(USER);
    harness.start_with(5).await;
    harness.controller.record_decision("msg-0", unsubscribe()).await.unwrap();
    harness.decide_all(DecisionAction::Keep).await;
    assert!(!unlocked(&harness, AchievementId::Curator));

    harness.start_with(5).await;
    harness.decide_all(DecisionAction::Keep).await;
    assert!(unlocked(&harness, AchievementId::Curator));
}

#[tokio::test]
async fn test_revoke_restores_every_aggregate() {
    let mut harness = Harness::new(USER);
    harness.start_with(4).await;
    harness.controller.record_decision("msg-0", unsubscribe()).await.unwrap();

    let today = day_key(harness.clock.now(), Utc.fix());
    let profile_before = harness.controller.profile().unwrap().clone();
    let session_before = harness.controller.session().unwrap().clone();
    let day_before = harness.store.daily_activity(USER, today).await.unwrap().unwrap();
    let unlocks_before = harness.controller.unlocks().len();

    let recorded = harness.controller.record_decision("msg-1", DecisionAction::Keep).await.unwrap();
    assert!(recorded.unlocks.is_empty());
    harness.controller.revoke(&recorded.held).await.unwrap();

    assert_eq!(harness.controller.profile().unwrap(), &profile_before);
    assert_eq!(harness.controller.session().unwrap(), &session_before);
    assert_eq!(harness.controller.cursor(), 1);
    assert_eq!(harness.controller.unlocks().len(), unlocks_before);
    assert_eq!(harness.stored_profile().await, profile_before);
    assert_eq!(harness.store.session(session_before.id).await.unwrap(), session_before);
    assert_eq!(harness.store.daily_activity(USER, today).await.unwrap().unwrap(), day_before);
}

#[tokio::test]
async fn test_revoking_the_completing_decision_reopens_the_session() {
    let mut harness = Harness::new(USER);
    harness.start_with(1).await;

    let recorded = harness.controller.record_decision("msg-0", DecisionAction::Keep).await.unwrap();
    assert!(recorded.completed);
    harness.controller.revoke(&recorded.held).await.unwrap();

    assert_eq!(harness.controller.phase(), &SessionPhase::Active);
    assert_eq!(harness.controller.current_item().map(|i| i.id.as_str()), Some("msg-0"));
    let session = harness.controller.session().unwrap();
    assert!(!session.is_completed);
    assert!(session.ended_at.is_none());

    let profile = harness.stored_profile().await;
    assert_eq!(profile.total_sessions_completed, 0);
    assert_eq!(profile.total_decisions(), 0);
    // Streak and unlocks survive the undo.
    assert_eq!(profile.current_streak, 1);
    assert!(unlocked(&harness, AchievementId::FirstSession));

    let today = day_key(harness.clock.now(), Utc.fix());
    let day = harness.store.daily_activity(USER, today).await.unwrap().unwrap();
    assert_eq!(day.processed, 0);
    assert!(day.counts_toward_streak);
}

#[tokio::test]
async fn test_failed_save_leaves_memory_equal_to_disk() {
    let mut harness = Harness::new(USER);
    harness.start_with(2).await;
    let profile_before = harness.controller.profile().unwrap().clone();

    harness.store.fail_saves(true);
    let err = harness.controller.record_decision("msg-0", unsubscribe()).await.unwrap_err();
    assert!(matches!(err, LedgerError::Persistence(PortError::Unexpected(_))));
    assert!(!err.is_retryable());
    assert_eq!(harness.controller.cursor(), 0);
    assert_eq!(harness.controller.profile().unwrap(), &profile_before);
    assert!(harness.controller.unlocks().is_empty());
    assert_eq!(harness.stored_profile().await, profile_before);

    harness.store.fail_saves(false);
    harness.controller.record_decision("msg-0", unsubscribe()).await.unwrap();
    assert_eq!(harness.stored_profile().await.lifetime_unsubscribes, 1);
}

#[tokio::test]
async fn test_unlock_events_follow_a_successful_save() {
    let mut harness = Harness::new(USER);
    let mut events = harness.feed.subscribe();
    harness.start_with(2).await;

    harness.store.fail_saves(true);
    assert!(harness.controller.record_decision("msg-0", DecisionAction::Keep).await.is_err());
    assert!(events.try_recv().is_err());

    harness.store.fail_saves(false);
    harness.controller.record_decision("msg-0", DecisionAction::Keep).await.unwrap();
    let event = events.try_recv().unwrap();
    assert_eq!(event.achievement, AchievementId::FirstDecision);
    assert_eq!(event.identity, USER);
}

#[tokio::test]
async fn test_streak_follows_consecutive_days() {
    let mut harness = Harness::new(USER);
    harness.start_with(1).await;
    harness.decide_all(DecisionAction::Keep).await;
    assert_eq!(harness.controller.profile().unwrap().current_streak, 1);

    harness.clock.advance(Duration::days(1));
    harness.start_with(1).await;
    harness.decide_all(DecisionAction::Keep).await;
    assert_eq!(harness.controller.profile().unwrap().current_streak, 2);

    // A second session the same day changes nothing.
    harness.start_with(1).await;
    harness.decide_all(DecisionAction::Keep).await;
    assert_eq!(harness.controller.profile().unwrap().current_streak, 2);

    harness.clock.advance(Duration::days(3));
    harness.start_with(1).await;
    harness.decide_all(DecisionAction::Keep).await;
    let profile = harness.controller.profile().unwrap();
    assert_eq!(profile.current_streak, 1);
    assert_eq!(profile.longest_streak, 2);
    assert_eq!(profile.last_activity_date, Some(day_key(harness.clock.now(), Utc.fix())));
}

#[tokio::test]
async fn test_three_day_streak_unlocks_on_a_roll() {
    let mut harness = Harness::new(USER);
    for day in 0..3 {
        harness.clock.set(noon(2024, 3, 4 + day));
        harness.start_with(1).await;
        harness.decide_all(unsubscribe()).await;
    }
    assert_eq!(harness.controller.profile().unwrap().longest_streak, 3);
    assert!(unlocked(&harness, AchievementId::Streak3));
}

#[tokio::test]
async fn test_delete_session_reverses_its_contribution() {
    let mut harness = Harness::new(USER);
    harness.start_with(3).await;
    harness.decide_all(unsubscribe()).await;
    let finished = harness.controller.session().unwrap().id;

    harness.start_with(2).await;
    let live = harness.controller.session().unwrap().id;
    let err = harness.controller.delete_session(live).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));

    let profile = harness.controller.delete_session(finished).await.unwrap();
    assert_eq!(profile.total_xp, 0);
    assert_eq!(profile.lifetime_unsubscribes, 0);
    assert_eq!(profile.total_sessions_completed, 0);
    assert_eq!(profile.current_level, 1);
    assert!(matches!(harness.store.session(finished).await, Err(PortError::NotFound(_))));

    let today = day_key(harness.clock.now(), Utc.fix());
    let day = harness.store.daily_activity(USER, today).await.unwrap().unwrap();
    assert_eq!(day.processed, 0);
    assert_eq!(day.unsubscribed, 0);
    assert!(day.counts_toward_streak);
}

#[tokio::test]
async fn test_deleting_someone_elses_session_is_not_found() {
    let mut harness = Harness::new(USER);
    harness.start_with(1).await;
    harness.decide_all(DecisionAction::Keep).await;
    let session = harness.controller.session().unwrap().id;

    let err = remove_session(
        &harness.collaborators(),
        &RewardEngine::default(),
        "intruder@example.com",
        session,
        Utc.fix(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
    assert!(harness.store.session(session).await.is_ok());
}

#[tokio::test]
async fn test_merge_folds_duplicates_once() {
    let harness = Harness::new(USER);
    let at = harness.clock.now();

    let mut older = PlayerProfile::new("Someone@Example.com", at - Duration::days(10));
    older.total_xp = 100;
    older.lifetime_unsubscribes = 4;
    older.longest_streak = 6;
    older.refresh_level();
    let mut newer = PlayerProfile::new("someone@example.com", at);
    newer.total_xp = 250;
    newer.lifetime_keeps = 7;
    newer.current_streak = 2;
    newer.longest_streak = 2;
    newer.refresh_level();
    harness
        .store
        .save(LedgerWrite::new().profile(&older).profile(&newer))
        .await
        .unwrap();

    let reconciler = ProfileReconciler::new(harness.store.clone(), harness.clock.clone(), RewardEngine::default());
    let outcome = reconciler.merge("SOMEONE@example.com").await.unwrap();
    assert_eq!(
        outcome,
        MergeOutcome::Merged {
            canonical: older.id,
            removed: vec![newer.id],
        }
    );

    let merged = harness.store.profiles_matching(USER).await.unwrap();
    assert_eq!(merged.len(), 1);
    let merged = &merged[0];
    assert_eq!(merged.id, older.id);
    assert_eq!(merged.identity, USER);
    assert_eq!(merged.total_xp, 350);
    assert_eq!(merged.current_level, 3);
    assert_eq!(merged.total_decisions(), 11);
    assert_eq!(merged.longest_streak, 6);
    assert_eq!(merged.current_streak, 2);

    assert_eq!(reconciler.merge(USER).await.unwrap(), MergeOutcome::Unchanged);
    assert_eq!(harness.store.profiles_matching(USER).await.unwrap()[0], *merged);
}

#[tokio::test]
async fn test_start_reconciles_mixed_case_identity() {
    let mut harness = Harness::new("  SomeOne@Example.COM ");
    harness.start_with(1).await;
    assert_eq!(harness.controller.profile().unwrap().identity, USER);
    assert_eq!(harness.controller.session().unwrap().identity, USER);
    assert_eq!(harness.store.profiles_matching(USER).await.unwrap().len(), 1);
    assert_eq!(items(1)[0].id, "msg-0");
}

#[tokio::test]
async fn test_skipped_item_forfeits_clean_sweep() {
    let mut harness = Harness::new(USER);
    harness.start_with(6).await;
    for n in 0..5 {
        harness
            .controller
            .record_decision(&format!("msg-{n}"), unsubscribe())
            .await
            .unwrap();
    }
    let advanced = harness.controller.skip("msg-5").await.unwrap();
    assert!(advanced.completed);
    assert!(!unlocked(&harness, AchievementId::CleanSweep));
}

#[tokio::test]
async fn test_deleted_session_stays_deleted_after_a_live_decision() {
    let mut harness = Harness::new(USER);
    harness.start_with(2).await;
    harness.decide_all(unsubscribe()).await;
    let finished = harness.controller.session().unwrap().id;

    harness.start_with(3).await;
    harness.controller.record_decision("msg-0", unsubscribe()).await.unwrap();

    // Deleted from the dashboard while the live session keeps its own copy.
    let profile = remove_session(&harness.collaborators(), &RewardEngine::default(), USER, finished, Utc.fix())
        .await
        .unwrap();
    assert_eq!(profile.lifetime_unsubscribes, 1);
    assert_eq!(profile.total_sessions_completed, 0);

    harness.controller.record_decision("msg-1", unsubscribe()).await.unwrap();
    let stored = harness.stored_profile().await;
    assert_eq!(stored.lifetime_unsubscribes, 2);
    assert_eq!(stored.total_sessions_completed, 0);
    assert_eq!(stored.total_xp, 30);
    assert_eq!(harness.controller.profile().unwrap(), &stored);

    let today = day_key(harness.clock.now(), Utc.fix());
    let day = harness.store.daily_activity(USER, today).await.unwrap().unwrap();
    assert_eq!(day.unsubscribed, 2);
    assert!(matches!(harness.store.session(finished).await, Err(PortError::NotFound(_))));
}

#[tokio::test]
async fn test_live_session_deleted_elsewhere_is_not_saved_again() {
    let mut harness = Harness::new(USER);
    harness.start_with(3).await;
    harness.controller.record_decision("msg-0", unsubscribe()).await.unwrap();
    let live = harness.controller.session().unwrap().id;

    remove_session(&harness.collaborators(), &RewardEngine::default(), USER, live, Utc.fix())
        .await
        .unwrap();

    let err = harness.controller.record_decision("msg-1", unsubscribe()).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
    assert_eq!(harness.controller.phase(), &SessionPhase::NotStarted);
    assert!(harness.controller.session().is_none());
    assert!(matches!(harness.store.session(live).await, Err(PortError::NotFound(_))));
    assert_eq!(harness.stored_profile().await.lifetime_unsubscribes, 0);

    harness.start_with(1).await;
    assert_eq!(harness.controller.phase(), &SessionPhase::Active);
}

#[tokio::test]
async fn test_merge_grants_thresholds_crossed_by_the_sum() {
    let harness = Harness::new(USER);
    let mut events = harness.feed.subscribe();
    let at = harness.clock.now();

    let mut older = PlayerProfile::new(USER, at - Duration::days(3));
    older.total_xp = 600;
    older.total_points = 40;
    older.refresh_level();
    let mut newer = PlayerProfile::new("SOMEONE@example.com", at);
    newer.total_xp = 500;
    newer.total_points = 30;
    newer.refresh_level();
    assert!(older.current_level < 5 && newer.current_level < 5);
    harness
        .store
        .save(LedgerWrite::new().profile(&older).profile(&newer))
        .await
        .unwrap();

    let reconciler = ProfileReconciler::new(harness.store.clone(), harness.clock.clone(), RewardEngine::new(harness.feed.clone()));
    reconciler.merge(USER).await.unwrap();

    let merged = harness.stored_profile().await;
    assert_eq!(merged.current_level, 5);
    assert_eq!(merged.total_points, 40 + 30 + 100);
    let unlocks = harness.store.unlocks_for(USER).await.unwrap();
    let ids: Vec<_> = unlocks.iter().map(|u| u.achievement).collect();
    assert_eq!(ids, vec![AchievementId::Level5]);
    assert_eq!(events.try_recv().unwrap().achievement, AchievementId::Level5);

    assert_eq!(reconciler.merge(USER).await.unwrap(), MergeOutcome::Unchanged);
    assert_eq!(harness.store.unlocks_for(USER).await.unwrap().len(), 1);
}
