//! Grid crawl against the scripted portal: watermark bounding, per-row
//! degradation, and document recovery through both strategies.

use std::sync::Arc;

use noticewatch_common::parse_watermark;
use noticewatch_driver::PortalBrowser;
use noticewatch_engine::portal::selectors::NOTICES_SUBMENU;
use noticewatch_engine::testing::{
    sim_portal, MemoryObjectStore, MockBrowser, MockDirectFetcher, SimRow, SimState,
};
use noticewatch_engine::{DocumentPipeline, NoticeCrawler};

struct Harness {
    browser: MockBrowser,
    pipeline: DocumentPipeline,
    store: Arc<MemoryObjectStore>,
}

impl Harness {
    fn new(state: Arc<std::sync::Mutex<SimState>>, fetcher: MockDirectFetcher) -> Self {
        let store = Arc::new(MemoryObjectStore::default());
        let pipeline =
            DocumentPipeline::with_fetcher(Box::new(fetcher), store.clone(), sim_portal());
        Self {
            browser: MockBrowser::new(state),
            pipeline,
            store,
        }
    }

    async fn scan(&self, watermark: &str) -> Vec<noticewatch_common::Notice> {
        let page = self.browser.open_page().await.unwrap();
        let portal = sim_portal();
        let crawler = NoticeCrawler::new(page.as_ref(), &self.browser, &self.pipeline, &portal);
        crawler
            .scan(parse_watermark(watermark).unwrap())
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn scan_stops_at_the_watermark() {
    let state = SimState::new(sim_portal())
        .with_live_session()
        .with_rows(vec![
            SimRow::new("05-01-2023 10:00", "Margin update"),
            SimRow::new("03-01-2023 09:00", "Holiday schedule"),
            SimRow::new("31-12-2022 23:00", "Year-end notice"),
        ])
        .shared();
    let harness = Harness::new(state.clone(), MockDirectFetcher::default());

    let notices = harness.scan("2023-01-01T00:00").await;

    assert_eq!(notices.len(), 2);
    assert_eq!(notices[0].subject, "Margin update");
    assert_eq!(notices[1].subject, "Holiday schedule");
    assert_eq!(notices[0].notice_at, "2023-01-05T10:00:00");

    // Row 3 is at/below the watermark: its timestamp is read to decide the
    // stop, but its detail modal is never opened.
    let sim = state.lock().unwrap();
    assert_eq!(sim.modal_opens, vec![1, 2]);
}

#[tokio::test]
async fn empty_grid_yields_no_notices() {
    let state = SimState::new(sim_portal()).with_live_session().shared();
    let harness = Harness::new(state, MockDirectFetcher::default());
    assert!(harness.scan("2023-01-01T00:00").await.is_empty());
}

#[tokio::test]
async fn malformed_timestamp_skips_only_that_row() {
    let state = SimState::new(sim_portal())
        .with_live_session()
        .with_rows(vec![
            SimRow::new("05-01-2023 10:00", "Margin update"),
            SimRow::new("05/01/2023", "Broken row"),
            SimRow::new("03-01-2023 09:00", "Holiday schedule"),
        ])
        .shared();
    let harness = Harness::new(state, MockDirectFetcher::default());

    let notices = harness.scan("2023-01-01T00:00").await;
    let subjects: Vec<_> = notices.iter().map(|n| n.subject.as_str()).collect();
    assert_eq!(subjects, vec!["Margin update", "Holiday schedule"]);
}

#[tokio::test]
async fn blank_cells_degrade_to_sentinel() {
    let mut row = SimRow::new("05-01-2023 10:00", "Margin update");
    row.company = "   ".to_string();
    let state = SimState::new(sim_portal())
        .with_live_session()
        .with_rows(vec![row])
        .shared();
    let harness = Harness::new(state, MockDirectFetcher::default());

    let notices = harness.scan("2023-01-01T00:00").await;
    assert_eq!(notices[0].company, "N/A");
    assert_eq!(notices[0].notice_type, "Circular");
}

#[tokio::test]
async fn detail_body_is_cleaned_markup() {
    let state = SimState::new(sim_portal())
        .with_live_session()
        .with_rows(vec![SimRow::new("05-01-2023 10:00", "Margin update")])
        .shared();
    let harness = Harness::new(state.clone(), MockDirectFetcher::default());

    let notices = harness.scan("2023-01-01T00:00").await;
    assert_eq!(notices[0].notice_text, "Margin update body");

    // The modal was opened and closed again.
    let sim = state.lock().unwrap();
    assert_eq!(sim.modal_opens, vec![1]);
}

#[tokio::test]
async fn unrenderable_modal_falls_back_to_title() {
    let mut row = SimRow::new("05-01-2023 10:00", "Margin update");
    row.body_html = None;
    let state = SimState::new(sim_portal())
        .with_live_session()
        .with_rows(vec![row])
        .shared();
    let harness = Harness::new(state, MockDirectFetcher::default());

    let notices = harness.scan("2023-01-01T00:00").await;
    assert_eq!(notices[0].notice_text, "Margin update (summary)");
}

#[tokio::test]
async fn late_rendering_modal_does_not_block_later_rows() {
    // Row 1's modal opens but its body never renders within the wait budget;
    // it must be closed again so row 2's modal stays reachable.
    let mut late = SimRow::new("05-01-2023 10:00", "Margin update");
    late.body_renders_late = true;
    let state = SimState::new(sim_portal())
        .with_live_session()
        .with_rows(vec![
            late,
            SimRow::new("03-01-2023 09:00", "Holiday schedule"),
        ])
        .shared();
    let harness = Harness::new(state.clone(), MockDirectFetcher::default());

    let notices = harness.scan("2023-01-01T00:00").await;

    assert_eq!(notices[0].notice_text, "Margin update (summary)");
    assert_eq!(notices[1].notice_text, "Holiday schedule body");
    assert_eq!(state.lock().unwrap().modal_opens, vec![1, 2]);
}

#[tokio::test]
async fn document_recovered_by_direct_fetch() {
    let mut row = SimRow::new("05-01-2023 10:00", "Margin update");
    row.document_href = Some("/documents/42".to_string());
    let state = SimState::new(sim_portal())
        .with_live_session()
        .with_rows(vec![row])
        .shared();
    let fetcher = MockDirectFetcher::default().with_response(
        "https://portal.example/documents/42",
        b"%PDF-1.7 margin".to_vec(),
    );
    let harness = Harness::new(state, fetcher);

    let notices = harness.scan("2023-01-01T00:00").await;
    assert_eq!(
        notices[0].document_url.as_deref(),
        Some("https://files.example/acme-ltd-margin-update.pdf")
    );

    let uploads = harness.store.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "acme-ltd-margin-update.pdf");
    assert_eq!(uploads[0].1, b"%PDF-1.7 margin".to_vec());

    // Direct fetch succeeded, so interception was never attempted.
    assert!(harness.browser.capture_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn document_recovered_by_interception_when_direct_fetch_fails() {
    let mut row = SimRow::new("05-01-2023 10:00", "Margin update");
    row.document_href = Some("https://portal.example/documents/42".to_string());
    let state = SimState::new(sim_portal())
        .with_live_session()
        .with_rows(vec![row])
        .shared();
    let harness = Harness::new(state.clone(), MockDirectFetcher::default());
    let browser = harness
        .browser
        .clone()
        .with_capture("https://portal.example/documents/42", b"%PDF-1.7 x".to_vec());

    let page = browser.open_page().await.unwrap();
    let portal = sim_portal();
    let crawler = NoticeCrawler::new(page.as_ref(), &browser, &harness.pipeline, &portal);
    let notices = crawler
        .scan(parse_watermark("2023-01-01T00:00").unwrap())
        .await
        .unwrap();

    assert!(notices[0].document_url.is_some());
    assert_eq!(
        browser.capture_calls.lock().unwrap().as_slice(),
        ["https://portal.example/documents/42"]
    );
}

#[tokio::test]
async fn failed_recovery_keeps_the_row_without_a_document() {
    let mut row = SimRow::new("05-01-2023 10:00", "Margin update");
    row.document_href = Some("/documents/42".to_string());
    let state = SimState::new(sim_portal())
        .with_live_session()
        .with_rows(vec![row])
        .shared();
    // No direct response and no capture registered: both strategies fail.
    let harness = Harness::new(state, MockDirectFetcher::default());

    let notices = harness.scan("2023-01-01T00:00").await;
    assert_eq!(notices.len(), 1);
    assert!(notices[0].document_url.is_none());
    assert!(harness.store.uploads().is_empty());
}

#[tokio::test]
async fn grid_behind_menu_is_reached_by_traversal() {
    let mut sim = SimState::new(sim_portal())
        .with_live_session()
        .with_rows(vec![SimRow::new("05-01-2023 10:00", "Margin update")]);
    sim.direct_grid = false;
    let state = sim.shared();
    let harness = Harness::new(state.clone(), MockDirectFetcher::default());

    let notices = harness.scan("2023-01-01T00:00").await;
    assert_eq!(notices.len(), 1);
    assert!(state
        .lock()
        .unwrap()
        .clicks
        .contains(&NOTICES_SUBMENU.to_string()));
}
