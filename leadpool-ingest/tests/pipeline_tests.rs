//! End-to-end pipeline tests
//!
//! Drive the full ingest -> dedup -> store -> materialize path over real
//! files in a temp directory and a file-backed SQLite database.

use leadpool_common::config::Config;
use leadpool_common::db::init_database;
use leadpool_ingest::dedup::{self, IngestOutcome};
use leadpool_ingest::materialize::Materializer;
use leadpool_ingest::store::LeadStore;
use sqlx::SqlitePool;
use std::fs::File;
use std::io::Write;

struct TestEnv {
    _dir: tempfile::TempDir,
    pool: SqlitePool,
    config: Config,
}

impl TestEnv {
    async fn new() -> TestEnv {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        std::fs::create_dir(&input).unwrap();

        let mut config = Config::default();
        config.input.directory = input;
        config.storage.db_path = dir.path().join("leadpool.db");
        // Small batches exercise the flush path; a single parse worker
        // makes file processing order deterministic for first-seen checks
        config.storage.batch_size = 3;
        config.pipeline.max_parse_workers = 1;

        let pool = init_database(&config.storage.db_path).await.unwrap();
        TestEnv {
            _dir: dir,
            pool,
            config,
        }
    }

    fn write_file(&self, name: &str, content: &str) {
        let path = self.config.input.directory.join(name);
        let mut f = File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    async fn ingest(&self) -> IngestOutcome {
        dedup::run_ingest(&self.pool, &self.config).await.unwrap()
    }

    fn store(&self) -> LeadStore {
        LeadStore::new(self.pool.clone())
    }

    fn materializer(&self) -> Materializer {
        Materializer::new(self.pool.clone())
    }
}

fn strip_refresh(
    mut rows: Vec<leadpool_common::db::models::OverlapRow>,
) -> Vec<leadpool_common::db::models::OverlapRow> {
    for row in &mut rows {
        row.refreshed_at.clear();
    }
    rows
}

#[tokio::test]
async fn phone_formats_resolve_to_one_lead() {
    let env = TestEnv::new().await;
    env.write_file(
        "acme_march.csv",
        "phone,area,date\n(555) 123-4567,North,2024-03-01\n",
    );
    env.write_file(
        "zenith_march.csv",
        "phone,area,date\n555-123-4567,North,2024-03-02\n",
    );
    env.write_file(
        "bolt_march.csv",
        "phone,area,date\n5551234567,North,2024-03-03\n",
    );

    let outcome = env.ingest().await;
    assert_eq!(outcome.stats.rows_accepted, 3);
    assert_eq!(outcome.stats.leads_created, 1);
    assert_eq!(outcome.stats.providers_created, 3);
    assert_eq!(outcome.stats.submissions_created, 3);

    let counts = env.store().counts().await.unwrap();
    assert_eq!(counts.leads, 1);
    assert_eq!(counts.providers, 3);
    assert_eq!(counts.submissions, 3);

    let lead = env
        .store()
        .lead_by_phone("5551234567")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lead.area, "NORTH");
}

#[tokio::test]
async fn reingestion_is_idempotent() {
    let env = TestEnv::new().await;
    env.write_file(
        "acme_march.csv",
        "phone,area,date\n5551234567,North,2024-03-01\n5559876543,South,2024-03-01\n",
    );
    env.write_file(
        "zenith_march.csv",
        "phone,area,date\n5551234567,North,2024-03-02\n",
    );

    let first = env.ingest().await;
    assert_eq!(first.stats.leads_created, 2);
    assert_eq!(first.stats.submissions_created, 3);

    let second = env.ingest().await;
    assert_eq!(second.stats.rows_accepted, 3);
    assert_eq!(second.stats.leads_created, 0);
    assert_eq!(second.stats.providers_created, 0);
    assert_eq!(second.stats.submissions_created, 0);

    let counts = env.store().counts().await.unwrap();
    assert_eq!(counts.leads, 2);
    assert_eq!(counts.providers, 2);
    assert_eq!(counts.submissions, 3);
}

#[tokio::test]
async fn provenance_lists_every_provider_once() {
    let env = TestEnv::new().await;
    for (name, date) in [
        ("acme_x.csv", "2024-03-01"),
        ("zenith_x.csv", "2024-03-02"),
        ("bolt_x.csv", "2024-03-03"),
    ] {
        env.write_file(
            name,
            &format!("phone,area,date\n5551234567,North,{}\n", date),
        );
    }
    // Repeat submission from acme must not duplicate the provenance
    env.write_file(
        "acme_y.csv",
        "phone,area,date\n5551234567,North,2024-03-10\n",
    );

    env.ingest().await;
    env.materializer().rebuild_full().await.unwrap();

    let row = env
        .materializer()
        .overlap_by_phone("5551234567")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.provider_count, 3);
    assert_eq!(row.all_providers, "acme,zenith,bolt");
}

#[tokio::test]
async fn primary_provider_is_earliest_submitter() {
    let env = TestEnv::new().await;
    // zenith submits earlier despite its file sorting later
    env.write_file(
        "acme_x.csv",
        "phone,area,date\n5551234567,North,2024-03-05 09:00:00\n",
    );
    env.write_file(
        "zenith_x.csv",
        "phone,area,date\n5551234567,North,2024-03-01 09:00:00\n",
    );

    env.ingest().await;

    // Reproducible across rebuilds
    for _ in 0..2 {
        env.materializer().rebuild_full().await.unwrap();
        let row = env
            .materializer()
            .overlap_by_phone("5551234567")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.primary_provider.as_deref(), Some("zenith"));
        assert_eq!(row.all_providers, "zenith,acme");
    }
}

#[tokio::test]
async fn corrupt_rows_do_not_abort_the_run() {
    let env = TestEnv::new().await;
    let mut content = String::from("phone,area,date\n");
    content.push_str("not-a-phone,North,2024-03-01\n");
    for i in 0..50 {
        content.push_str(&format!("55512340{:02},North,2024-03-01\n", i));
    }
    env.write_file("acme_bulk.csv", &content);

    let outcome = env.ingest().await;
    assert_eq!(outcome.stats.rows_read, 51);
    assert_eq!(outcome.stats.rows_accepted, 50);
    assert_eq!(outcome.stats.rows_corrupt, 1);
    assert_eq!(
        outcome.stats.corrupt_reasons.get("invalid_phone"),
        Some(&1)
    );

    let counts = env.store().counts().await.unwrap();
    assert_eq!(counts.leads, 50);
}

#[tokio::test]
async fn area_conflict_keeps_first_seen_area() {
    let env = TestEnv::new().await;
    // Path-sorted with one worker: acme's file is processed first
    env.write_file(
        "acme_x.csv",
        "phone,area,date\n5551234567,North,2024-03-01\n",
    );
    env.write_file(
        "zenith_x.csv",
        "phone,area,date\n5551234567,South,2024-03-02\n",
    );

    let outcome = env.ingest().await;
    assert_eq!(outcome.stats.area_conflicts, 1);

    let lead = env
        .store()
        .lead_by_phone("5551234567")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lead.area, "NORTH");
}

#[tokio::test]
async fn unrecognized_area_is_warning_not_rejection() {
    let env = TestEnv::new().await;
    let mut config = env.config.clone();
    config.normalizer.known_areas = vec!["North".to_string()];
    env.write_file(
        "acme_x.csv",
        "phone,area,date\n5551234567,Atlantis,2024-03-01\n5559876543,North,2024-03-01\n",
    );

    let outcome = dedup::run_ingest(&env.pool, &config).await.unwrap();
    assert_eq!(outcome.stats.rows_accepted, 2);
    assert_eq!(outcome.stats.rows_unrecognized_area, 1);

    let lead = env
        .store()
        .lead_by_phone("5551234567")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lead.area, "ATLANTIS");
    assert!(!lead.area_recognized);
}

#[tokio::test]
async fn incremental_refresh_matches_full_rebuild() {
    let env = TestEnv::new().await;
    env.write_file(
        "acme_x.csv",
        "phone,area,date\n5551234567,North,2024-03-01\n5559876543,South,2024-03-01\n",
    );
    env.ingest().await;
    env.materializer().rebuild_full().await.unwrap();

    // Second batch arrives: one new lead, one new provider on an old lead
    env.write_file(
        "zenith_x.csv",
        "phone,area,date\n5551234567,North,2024-03-05\n5550001111,East,2024-03-05\n",
    );
    let outcome = env.ingest().await;

    env.materializer()
        .refresh_incremental(&outcome.touched_leads)
        .await
        .unwrap();
    let incremental = strip_refresh(env.materializer().overlap_rows().await.unwrap());

    env.materializer().rebuild_full().await.unwrap();
    let full = strip_refresh(env.materializer().overlap_rows().await.unwrap());

    assert_eq!(incremental, full);
    assert_eq!(full.len(), 3);
}

#[tokio::test]
async fn provider_delete_cascades_and_projection_follows() {
    let env = TestEnv::new().await;
    env.write_file(
        "acme_x.csv",
        "phone,area,date\n5551234567,North,2024-03-01\n",
    );
    env.write_file(
        "zenith_x.csv",
        "phone,area,date\n5551234567,North,2024-03-02\n5559876543,South,2024-03-02\n",
    );
    env.ingest().await;

    let result = env
        .store()
        .delete_provider("acme", env.config.storage.orphan_leads)
        .await
        .unwrap();
    assert_eq!(result.submissions_removed, 1);
    assert_eq!(result.leads_purged, 0);

    env.materializer().rebuild_full().await.unwrap();
    let row = env
        .materializer()
        .overlap_by_phone("5551234567")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.provider_count, 1);
    assert_eq!(row.all_providers, "zenith");

    // Unrelated lead untouched
    let other = env
        .materializer()
        .overlap_by_phone("5559876543")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(other.all_providers, "zenith");
}

#[tokio::test]
async fn empty_and_mixed_format_files_are_tolerated() {
    let env = TestEnv::new().await;
    env.write_file("acme_empty.csv", "");
    env.write_file(
        "bolt_semis.csv",
        "Telephone;Region;Entry Date\n5551234567;North;2024-03-01\n",
    );
    env.write_file("zenith_tabs.tsv", "phone\tarea\n5559876543\tSouth\n");

    let outcome = env.ingest().await;
    assert_eq!(outcome.stats.files_total, 3);
    assert_eq!(outcome.stats.rows_accepted, 2);
    assert_eq!(outcome.stats.rows_corrupt, 0);

    let counts = env.store().counts().await.unwrap();
    assert_eq!(counts.leads, 2);
    assert_eq!(counts.providers, 2);
}

#[tokio::test]
async fn audit_run_is_recorded() {
    let env = TestEnv::new().await;
    env.write_file(
        "acme_x.csv",
        "phone,area,date\n5551234567,North,2024-03-01\nbogus,North,2024-03-01\n",
    );
    env.ingest().await;

    let run = env.store().last_run().await.unwrap().unwrap();
    assert_eq!(run.files_total, 1);
    assert_eq!(run.rows_read, 2);
    assert_eq!(run.rows_accepted, 1);
    assert_eq!(run.rows_corrupt, 1);

    let summary: serde_json::Value = serde_json::from_str(&run.summary).unwrap();
    assert_eq!(summary["corrupt_reasons"]["invalid_phone"], 1);
}
