//! End-to-end scenario runs against the simulated back-end.
//!
//! Every test runs on a paused clock, so the 50-180 s measurement windows
//! complete instantly while keeping their timing relationships.

use cuj_core::{MeetConfig, RoomSize, ScenarioKind, Step, Tier};
use cuj_runner::sim::{no_room_prepare, SimBackend, SimScript};
use cuj_runner::{run, run_with_room_urls, Context, ErrorKind, Releaser, ScenarioParams, ScenarioReport};
use futures_util::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

fn root() -> (Context, Releaser) {
    Context::background().with_timeout(Duration::from_secs(30 * 60))
}

fn backend(participants: &[u32]) -> SimBackend {
    SimBackend::from_script(SimScript {
        participants: participants.to_vec(),
        ..SimScript::default()
    })
}

async fn run_conference(
    ctx: &Context,
    backend: &SimBackend,
    tier: Tier,
    room: RoomSize,
    dir: &Path,
) -> cuj_runner::Result<ScenarioReport> {
    let params = ScenarioParams::new(ScenarioKind::Conference, tier, room, dir);
    let mut workload = backend.workload(ScenarioKind::Conference, room);
    let prepare = if room.has_room() {
        backend.prepare(format!("https://meet.test/{}", room.as_str()))
    } else {
        no_room_prepare()
    };
    run(ctx, backend.session(), &mut workload, prepare, &params).await
}

fn read_events(dir: &Path) -> Vec<Value> {
    let content = std::fs::read_to_string(dir.join("events.jsonl")).unwrap();
    content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn event_types(dir: &Path) -> Vec<String> {
    read_events(dir)
        .iter()
        .map(|e| e["type"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn basic_small_room_runs_core_steps() {
    let dir = TempDir::new().unwrap();
    let sim = backend(&[6]);
    let (ctx, _release) = root();
    let ctx = ctx.with_annotation("mute", "true");

    let report = run_conference(&ctx, &sim, Tier::Basic, RoomSize::Small, dir.path())
        .await
        .unwrap();

    assert_eq!(
        report.executed(),
        vec![Step::Join, Step::SwitchTabs, Step::ToggleAv, Step::ChangeLayout]
    );
    assert_eq!(report.window, Duration::from_secs(50));
    assert_eq!(report.bag.get("Browser.StartTime").unwrap().len(), 1);
    assert!(report.bag.contains("GPU.Busy"));
    assert!(report.bag.contains("GPU.Frequency"));
    assert!(!report.bag.contains("Apps.StartTime"));

    assert!(dir.path().join("Browser.StartTime.perf.json").exists());
    assert!(dir.path().join("GPU.Busy.perf.json").exists());
    assert!(dir.path().join("histograms.json").exists());
    assert!(!dir.path().join("service").exists());

    // Run cleanups in reverse acquisition order, then the driver, then the room.
    let journal = sim.journal();
    let close = journal.position("recorder.close").unwrap();
    let unmute = journal.position("session.unmute").unwrap();
    let restore = journal.position("session.restore_settings").unwrap();
    let end = journal.position("conference.end").unwrap();
    let release = journal.position("release https://meet.test/small").unwrap();
    assert!(close < unmute);
    assert!(unmute < restore);
    assert!(restore < end);
    assert!(end < release);

    let types = event_types(dir.path());
    assert_eq!(types.first().map(String::as_str), Some("SCENARIO_STARTED"));
    assert_eq!(types.last().map(String::as_str), Some("SCENARIO_COMPLETED"));
    assert_eq!(types.iter().filter(|t| *t == "STEP_FINISHED").count(), 4);
    assert!(types.contains(&"WINDOW_CLOSED".to_string()));
}

#[tokio::test(start_paused = true)]
async fn plus_large_room_presents_slides() {
    let dir = TempDir::new().unwrap();
    let sim = backend(&[16, 17]);
    let (ctx, _release) = root();

    let report = run_conference(&ctx, &sim, Tier::Plus, RoomSize::Large, dir.path())
        .await
        .unwrap();

    assert_eq!(report.executed().last(), Some(&Step::Present));
    assert_eq!(report.window, Duration::from_secs(140));
    assert!(!report.bag.contains("Apps.StartTime"));

    let journal = sim.journal();
    assert_eq!(journal.matching("document.create").len(), 1);
    assert_eq!(journal.matching("document.delete").len(), 1);
    assert!(journal.position("document.create slides") < journal.position("document.delete slides"));
}

#[tokio::test(start_paused = true)]
async fn premium_class_room_cycles_layouts_and_backgrounds() {
    let dir = TempDir::new().unwrap();
    let sim = backend(&[40]);
    let (ctx, _release) = root();

    let report = run_conference(&ctx, &sim, Tier::Premium, RoomSize::ClassRoom, dir.path())
        .await
        .unwrap();

    assert_eq!(report.executed().len(), 6);
    assert_eq!(report.window, Duration::from_secs(180));

    let journal = sim.journal();
    assert!(journal.contains("document.create docs"));
    assert!(journal.contains("document.delete docs"));
    assert_eq!(journal.matching("conference.layout ").len(), 3);
    assert_eq!(journal.matching("conference.background ").len(), 3);
    assert!(journal.contains("conference.background_panel closed"));
}

#[tokio::test(start_paused = true)]
async fn no_room_measures_only_the_window() {
    let dir = TempDir::new().unwrap();
    let sim = backend(&[]);
    let (ctx, _release) = root();
    let start = Instant::now();

    let report = run_conference(&ctx, &sim, Tier::Basic, RoomSize::NoRoom, dir.path())
        .await
        .unwrap();

    assert!(report.steps.is_empty());
    assert_eq!(report.window, Duration::from_secs(70));
    assert!(start.elapsed() >= Duration::from_secs(70));
    assert!(sim.journal().matching("conference.").is_empty());

    let mut names: Vec<&str> = report.bag.names().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Browser.StartTime", "GPU.Busy", "GPU.Frequency"]);
}

#[tokio::test(start_paused = true)]
async fn lone_participant_fails_and_dumps_diagnostics() {
    let dir = TempDir::new().unwrap();
    let sim = backend(&[1]);
    let (ctx, _release) = root();

    let err = run_conference(&ctx, &sim, Tier::Basic, RoomSize::Small, dir.path())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ParticipantCount);
    assert_eq!(err.breadcrumbs(), vec!["join"]);
    assert!(dir.path().join("service").join("ui_dump.txt").exists());
    assert!(!dir.path().join("Browser.StartTime.perf.json").exists());

    let journal = sim.journal();
    assert_eq!(journal.matching("conference.participants").len(), 5);
    for entry in [
        "conference.end",
        "recorder.stop",
        "recorder.close",
        "session.restore_settings",
        "session.dump_ui",
        "release https://meet.test/small",
    ] {
        assert!(journal.contains(entry), "missing {entry}");
    }
    // The dump shows the room as it was when the check failed.
    let dump = journal.position("session.dump_ui").unwrap();
    let end = journal.position("conference.end").unwrap();
    let release = journal.position("release https://meet.test/small").unwrap();
    assert!(dump < end);
    assert!(end < release);

    let types = event_types(dir.path());
    assert_eq!(types.last().map(String::as_str), Some("SCENARIO_FAILED"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_present_still_deletes_document() {
    let dir = TempDir::new().unwrap();
    let sim = backend(&[5]);
    let (ctx, release) = root();
    let start = Instant::now();

    // Present begins just before the one minute mark and edits for six seconds.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        release.cancel();
    });

    let err = run_conference(&ctx, &sim, Tier::Plus, RoomSize::Small, dir.path())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.breadcrumbs().first(), Some(&"present"));
    assert!(start.elapsed() < Duration::from_secs(63));

    let journal = sim.journal();
    assert!(journal.contains("document.create slides"));
    assert!(journal.contains("document.delete slides"));
    assert!(!journal.contains("conference.sharing"));
    assert!(journal.contains("release https://meet.test/small"));
    assert!(dir.path().join("service").exists());
}

#[tokio::test(start_paused = true)]
async fn panic_in_driver_unwinds_cleanups() {
    let dir = TempDir::new().unwrap();
    let sim = SimBackend::from_script(SimScript {
        participants: vec![2],
        panic_on: Some("conference.toggle_av".into()),
        ..SimScript::default()
    });
    let (ctx, _release) = root();

    let outcome = AssertUnwindSafe(run_conference(&ctx, &sim, Tier::Basic, RoomSize::Two, dir.path()))
        .catch_unwind()
        .await;
    assert!(outcome.is_err());

    let journal = sim.journal();
    assert!(journal.contains("conference.end"));
    assert!(journal.contains("session.restore_settings"));
    assert!(journal.contains("session.dump_ui"));
    assert!(journal.contains("release https://meet.test/two"));
    assert!(journal.position("session.dump_ui") < journal.position("conference.end"));

    let events = read_events(dir.path());
    let last = events.last().unwrap();
    assert_eq!(last["type"], "SCENARIO_FAILED");
    assert_eq!(last["payload"]["kind"], "panic");
    assert!(last["payload"]["reason"]
        .as_str()
        .unwrap()
        .contains("conference.toggle_av"));
}

#[tokio::test(start_paused = true)]
async fn unavailable_feature_is_skipped() {
    let dir = TempDir::new().unwrap();
    let mut script = SimScript {
        participants: vec![40],
        ..SimScript::default()
    };
    script.unsupported.insert("conference.change_background".into());
    let sim = SimBackend::from_script(script);
    let (ctx, _release) = root();

    let report = run_conference(&ctx, &sim, Tier::Premium, RoomSize::ClassRoom, dir.path())
        .await
        .unwrap();

    assert_eq!(report.skipped(), vec![Step::ChangeBackground]);
    assert_eq!(report.executed().len(), 5);
    assert!(event_types(dir.path()).contains(&"STEP_SKIPPED".to_string()));
}

#[tokio::test(start_paused = true)]
async fn short_room_falls_back_to_next_url() {
    let dir = TempDir::new().unwrap();
    let (ctx, _release) = root();
    let config = MeetConfig {
        account: None,
        password: None,
        urls: vec!["https://meet.test/a".into(), "https://meet.test/b".into()],
        retry_timeout: Duration::ZERO,
        retry_interval: Duration::from_secs(60),
    };
    let params = ScenarioParams::new(ScenarioKind::Conference, Tier::Basic, RoomSize::Small, dir.path());
    let attempts = AtomicU32::new(0);

    let report = run_with_room_urls(&ctx, &config, |ctx, url| {
        attempts.fetch_add(1, Ordering::SeqCst);
        let counts: &[u32] = if url.ends_with("/a") { &[1] } else { &[6] };
        let sim = backend(counts);
        let params = params.clone();
        async move {
            let mut workload = sim.workload(ScenarioKind::Conference, RoomSize::Small);
            run(&ctx, sim.session(), &mut workload, sim.prepare(url), &params).await
        }
    })
    .await
    .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(report.executed().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn video_premium_plays_heavier_source() {
    let dir = TempDir::new().unwrap();
    let sim = SimBackend::new();
    let (ctx, _release) = root();
    let params = ScenarioParams::new(ScenarioKind::Video, Tier::Premium, RoomSize::NoRoom, dir.path())
        .with_tablet_mode(true);
    let mut workload = sim.workload(ScenarioKind::Video, RoomSize::NoRoom);

    let report = run(&ctx, sim.session(), &mut workload, no_room_prepare(), &params)
        .await
        .unwrap();

    assert_eq!(report.executed().len(), 5);
    let journal = sim.journal();
    assert!(journal.contains("video.play 2160p"));
    assert!(journal.contains("session.tablet_mode true"));
    assert!(journal.contains("session.restore_tablet_mode"));
    assert!(journal.contains("video.close"));
}

#[tokio::test(start_paused = true)]
async fn multitasking_cycles_every_opened_tab() {
    let dir = TempDir::new().unwrap();
    let sim = SimBackend::new();
    let (ctx, _release) = root();
    let params = ScenarioParams::new(ScenarioKind::Multitasking, Tier::Plus, RoomSize::NoRoom, dir.path());
    let mut workload = sim.workload(ScenarioKind::Multitasking, RoomSize::NoRoom);

    let report = run(&ctx, sim.session(), &mut workload, no_room_prepare(), &params)
        .await
        .unwrap();

    assert_eq!(
        report.executed(),
        vec![Step::OpenTabs, Step::TileWindows, Step::CycleTabs]
    );
    assert_eq!(sim.journal().matching("browsing.focus").len(), 10);
    assert!(sim.journal().contains("browsing.close"));
}

#[tokio::test]
async fn mismatched_driver_is_a_setup_error() {
    let dir = TempDir::new().unwrap();
    let sim = SimBackend::new();
    let (ctx, _release) = root();
    let params = ScenarioParams::new(ScenarioKind::Video, Tier::Basic, RoomSize::NoRoom, dir.path());
    let mut workload = sim.workload(ScenarioKind::Conference, RoomSize::NoRoom);

    let err = run(&ctx, sim.session(), &mut workload, no_room_prepare(), &params)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Setup);
    assert!(sim.journal().entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reported_side_metrics_are_recorded() {
    let dir = TempDir::new().unwrap();
    let sim = SimBackend::from_script(SimScript {
        participants: vec![2],
        app_start: Some(Duration::from_millis(1200)),
        lost_network_count: Some(3),
        display_all_participants_time: Some(Duration::from_millis(2500)),
        ..SimScript::default()
    });
    let (ctx, _release) = root();

    let report = run_conference(&ctx, &sim, Tier::Basic, RoomSize::Two, dir.path())
        .await
        .unwrap();

    assert_eq!(report.bag.get("Apps.StartTime"), Some(&[1200.0][..]));
    assert_eq!(report.bag.get("Conference.LostNetworkCount"), Some(&[3.0][..]));
    assert_eq!(
        report.bag.get("Conference.DisplayAllParticipantsTime"),
        Some(&[2500.0][..])
    );
    assert!(dir.path().join("Conference.LostNetworkCount.perf.json").exists());
}

#[tokio::test(start_paused = true)]
async fn gpu_counters_are_collected_before_recording() {
    let dir = TempDir::new().unwrap();
    let sim = backend(&[6]);
    let (ctx, _release) = root();

    run_conference(&ctx, &sim, Tier::Basic, RoomSize::Small, dir.path())
        .await
        .unwrap();

    let journal = sim.journal();
    assert_eq!(journal.matching("gpu.start").len(), 1);
    let done = journal.position("gpu.done").unwrap();
    let stop = journal.position("recorder.stop").unwrap();
    let record = journal.position("recorder.record").unwrap();
    assert!(done < record);
    assert!(stop < record);
}

#[tokio::test(start_paused = true)]
async fn gpu_failure_is_a_telemetry_error_and_still_cleans_up() {
    let dir = TempDir::new().unwrap();
    let mut script = SimScript {
        participants: vec![6],
        ..SimScript::default()
    };
    script.failures.insert("gpu.start".into(), ErrorKind::Telemetry);
    let sim = SimBackend::from_script(script);
    let (ctx, _release) = root();

    let err = run_conference(&ctx, &sim, Tier::Basic, RoomSize::Small, dir.path())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Telemetry);
    assert!(err.breadcrumbs().contains(&"collect GPU counters"));
    assert!(!dir.path().join("histograms.json").exists());
    assert!(dir.path().join("service").join("ui_dump.txt").exists());

    let journal = sim.journal();
    assert!(!journal.contains("recorder.record"));
    // The window is closed even though its body failed.
    assert!(journal.contains("recorder.stop"));
    for entry in [
        "recorder.close",
        "session.restore_settings",
        "conference.end",
        "release https://meet.test/small",
    ] {
        assert!(journal.contains(entry), "missing {entry}");
    }
}

#[tokio::test(start_paused = true)]
async fn record_tier_runs_the_premium_plan() {
    let dir = TempDir::new().unwrap();
    let sim = backend(&[40]);
    let (ctx, _release) = root();
    let premium = ScenarioParams::new(ScenarioKind::Conference, Tier::Premium, RoomSize::ClassRoom, dir.path());

    let report = run_conference(&ctx, &sim, Tier::Record, RoomSize::ClassRoom, dir.path())
        .await
        .unwrap();

    assert_eq!(report.executed(), premium.plan());
    assert_eq!(report.window, Duration::from_secs(180));
    assert!(sim.journal().contains("conference.background_panel closed"));
}

#[tokio::test(start_paused = true)]
async fn screen_mode_variable_is_applied_and_reported() {
    let dir = TempDir::new().unwrap();
    let sim = backend(&[]);
    let (ctx, _release) = root();
    let ctx = ctx.with_annotation("cuj_mode", "tablet");

    run_conference(&ctx, &sim, Tier::Basic, RoomSize::NoRoom, dir.path())
        .await
        .unwrap();

    assert!(sim.journal().contains("session.tablet_mode true"));
    let events = read_events(dir.path());
    assert_eq!(events[0]["type"], "SCENARIO_STARTED");
    assert_eq!(events[0]["payload"]["tablet_mode"], true);
}

#[tokio::test(start_paused = true)]
async fn unrecognized_screen_mode_keeps_device_default() {
    let dir = TempDir::new().unwrap();
    let sim = backend(&[]);
    let (ctx, _release) = root();
    let ctx = ctx.with_annotation("cuj_mode", "desktop");

    let report = run_conference(&ctx, &sim, Tier::Basic, RoomSize::NoRoom, dir.path())
        .await
        .unwrap();

    assert_eq!(report.window, Duration::from_secs(70));
    assert!(sim.journal().matching("session.tablet_mode").is_empty());
    assert_eq!(read_events(dir.path())[0]["payload"]["tablet_mode"], false);
}
