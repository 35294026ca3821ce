mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use c2rs_core::{
    AlignmentResult, AlignmentSteps, C2rsError, OracleAlignmentSteps, PhaseState, RepairOptions,
    RepairStats, Result, RunState, VerificationLoop,
};
use common::{make_git_repo, run_git, Action, Harness, BROKEN, FIXED};

fn ready() -> RunState {
    RunState {
        transpile: PhaseState { completed: true },
        optimize: PhaseState { completed: true },
    }
}

fn result(aligned: bool, report: &str) -> AlignmentResult {
    AlignmentResult {
        is_aligned: aligned,
        summary: if aligned { "aligned" } else { "gaps found" }.to_string(),
        report: report.to_string(),
    }
}

struct Scripted {
    analyses: Mutex<VecDeque<AlignmentResult>>,
    reports_seen: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(analyses: Vec<AlignmentResult>) -> Arc<Self> {
        Arc::new(Self {
            analyses: Mutex::new(analyses.into()),
            reports_seen: Mutex::new(Vec::new()),
        })
    }

    fn optimize_calls(&self) -> usize {
        self.reports_seen.lock().unwrap().len()
    }
}

#[async_trait]
impl AlignmentSteps for Scripted {
    async fn analyze(&self) -> Result<AlignmentResult> {
        Ok(self
            .analyses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| result(false, "still diverging")))
    }

    async fn optimize(&self, report: &str, _stats: &mut RepairStats) -> Result<()> {
        self.reports_seen.lock().unwrap().push(report.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn refuses_to_run_before_upstream_phases() {
    let steps = Scripted::new(vec![]);
    let verify = VerificationLoop::new(steps.clone());
    let state = RunState {
        transpile: PhaseState { completed: true },
        optimize: PhaseState::default(),
    };

    let err = verify.run(&state, &mut RepairStats::new()).await.unwrap_err();
    assert!(matches!(err, C2rsError::PrerequisiteIncomplete(ref p) if p == "optimize"));
    assert_eq!(steps.optimize_calls(), 0);
}

#[tokio::test]
async fn aligned_crate_needs_no_optimization() {
    let steps = Scripted::new(vec![result(true, "")]);
    let report = VerificationLoop::new(steps.clone())
        .run(&ready(), &mut RepairStats::new())
        .await
        .unwrap();

    assert!(report.aligned);
    assert_eq!(report.iterations, 0);
    assert_eq!(steps.optimize_calls(), 0);
}

#[tokio::test]
async fn optimization_is_seeded_with_the_report() {
    let steps = Scripted::new(vec![result(false, "### [High] crc32 ignores seed"), result(true, "")]);
    let report = VerificationLoop::new(steps.clone())
        .with_max_iterations(5)
        .run(&ready(), &mut RepairStats::new())
        .await
        .unwrap();

    assert!(report.aligned);
    assert_eq!(report.iterations, 1);
    assert_eq!(
        steps.reports_seen.lock().unwrap().clone(),
        vec!["### [High] crc32 ignores seed".to_string()]
    );
}

#[tokio::test]
async fn never_aligned_stops_at_iteration_limit() {
    for max in [1u32, 3, 6] {
        let steps = Scripted::new(vec![]);
        let report = VerificationLoop::new(steps.clone())
            .with_max_iterations(max)
            .run(&ready(), &mut RepairStats::new())
            .await
            .unwrap();

        assert!(!report.aligned);
        assert!(steps.optimize_calls() <= max as usize);
        assert_eq!(report.iterations as usize, steps.optimize_calls());
        assert_eq!(report.result.summary, "gaps found");
    }
}

#[tokio::test]
async fn agent_driven_analysis_and_fix() {
    let repo = make_git_repo(BROKEN);
    let report_md = "### [High] answer\n\nC returns 42, Rust does not compile.\n";
    let h = Harness::new(
        repo.path(),
        vec![
            Action::Edit(
                vec![("alignment_report.md".into(), report_md.into())],
                "<SUMMARY>{\"is_aligned\": false, \"summary\": \"one gap\", \"report_path\": \"alignment_report.md\"}</SUMMARY>"
                    .into(),
            ),
            Action::write("src/lib.rs", FIXED),
            Action::reply("<SUMMARY>{\"is_aligned\": true, \"summary\": \"aligned\"}</SUMMARY>"),
        ],
    );
    let repair = Arc::new(h.repair_loop(repo.path(), RepairOptions::default()));
    let steps = Arc::new(OracleAlignmentSteps::new(repair, repo.path().join("c_src")));
    let mut stats = RepairStats::new();

    let report = VerificationLoop::new(steps)
        .with_max_iterations(3)
        .run(&ready(), &mut stats)
        .await
        .unwrap();

    assert!(report.aligned);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.result.summary, "aligned");
    assert!(h.oracle.prompts()[1].contains("### [High] answer"));
    assert_eq!(
        run_git(repo.path(), &["log", "-1", "--format=%s"]),
        "c2rs: alignment_fix"
    );
    assert!(!stats.is_degraded());
}

#[tokio::test]
async fn agent_failures_read_as_not_aligned() {
    let repo = make_git_repo(FIXED);
    let h = Harness::new(
        repo.path(),
        vec![Action::reply("looks good to me"), Action::Fail("quota".into())],
    );
    let repair = Arc::new(h.repair_loop(repo.path(), RepairOptions::default()));
    let steps = OracleAlignmentSteps::new(repair, repo.path());

    let unparsable = steps.analyze().await.unwrap();
    assert!(!unparsable.is_aligned);

    let failed = steps.analyze().await.unwrap();
    assert!(!failed.is_aligned);
    assert!(failed.summary.starts_with("analysis failed: "));
    assert!(failed.summary.contains("quota"));
}
