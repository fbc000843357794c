mod support;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use rxqa_ai::chunking::ChunkConfig;
use rxqa_ai::embeddings::EmbeddingGateway;
use rxqa_ai::evals::{load_eval_cases_csv, run_evals, EvalCase};
use rxqa_ai::ingest::ingest_document;
use rxqa_ai::pipeline::{Pipeline, PipelineConfig};
use rxqa_core::domain::{DrugDocument, Section};
use support::{pipeline, ready_index, FailingEmbedder, LetterEmbedder, ScriptedLlm, VocabTokenizer, DIMS};

fn metformin_label(version: i64, dosage: &str) -> DrugDocument {
    let mut sections = BTreeMap::new();
    sections.insert("34068-7".to_string(), dosage.to_string());
    sections.insert(
        "43685-7".to_string(),
        "Lactic acidosis has been reported in patients with renal impairment.".to_string(),
    );
    sections.insert("99999-9".to_string(), "   ".to_string());
    DrugDocument {
        drug_name: "Metformin".to_string(),
        setid: "set-metformin".to_string(),
        ndc_codes: vec!["0093-1048".to_string()],
        version,
        url: "https://dailymed.example/metformin".to_string(),
        sections,
    }
}

fn window(chunk_size: usize, chunk_overlap: usize) -> ChunkConfig {
    ChunkConfig {
        chunk_size,
        chunk_overlap,
    }
}

#[test]
fn ingest_chunks_embeds_once_and_stores_every_chunk() {
    let index = ready_index(DIMS);
    let embedder = Arc::new(LetterEmbedder::default());
    let gateway = EmbeddingGateway::new(embedder.clone());
    let tokenizer = VocabTokenizer::default();

    let long_dosage = (0..25).map(|i| format!("dose{i}")).collect::<Vec<_>>().join(" ");
    let doc = metformin_label(1, &long_dosage);

    let summary = ingest_document(&doc, &tokenizer, &window(10, 2), &gateway, &index).expect("ingest");

    // 25 tokens at size 10 / stride 8: windows start at 0, 8, 16.
    assert_eq!(summary.chunks, 4);
    assert_eq!(summary.keys.len(), 4);
    assert_eq!(summary.purged, 0);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(index.count(), 4);

    let rec = index.get(&summary.keys[0]).unwrap().expect("stored");
    assert_eq!(rec.chunk.section, Section::DosageAndAdministration);
    assert_eq!(rec.chunk.chunk_index, 0);
    assert!(rec.chunk.text.starts_with("dose0 dose1"));

    let again = ingest_document(&doc, &tokenizer, &window(10, 2), &gateway, &index).unwrap();
    assert_eq!(again.keys, summary.keys);
    assert_eq!(index.count(), 4);
}

#[test]
fn new_label_version_supersedes_the_old_one() {
    let index = ready_index(DIMS);
    let gateway = EmbeddingGateway::new(Arc::new(LetterEmbedder::default()));
    let tokenizer = VocabTokenizer::default();

    ingest_document(&metformin_label(1, "500 mg twice daily"), &tokenizer, &window(50, 5), &gateway, &index).unwrap();
    assert_eq!(index.count(), 2);

    let summary =
        ingest_document(&metformin_label(2, "850 mg once daily"), &tokenizer, &window(50, 5), &gateway, &index).unwrap();
    assert_eq!(summary.purged, 2);
    assert_eq!(index.count(), 2);
    assert!(summary.keys.iter().all(|k| k.contains(":2:")));
}

#[test]
fn embedding_failure_leaves_the_index_untouched() {
    let index = ready_index(DIMS);
    let gateway = EmbeddingGateway::new(Arc::new(FailingEmbedder));
    let err = ingest_document(
        &metformin_label(1, "500 mg"),
        &VocabTokenizer::default(),
        &window(50, 5),
        &gateway,
        &index,
    )
    .unwrap_err();
    assert_eq!(err.code, "INGEST_EMBED_FAILED");
    assert!(err.retryable);
    assert_eq!(index.count(), 0);
}

#[test]
fn eval_run_scores_cases_and_records_failures() {
    let index = ready_index(DIMS);
    let gateway = EmbeddingGateway::new(Arc::new(LetterEmbedder::default()));
    ingest_document(
        &metformin_label(1, "The recommended starting dose is 500 mg twice daily."),
        &VocabTokenizer::default(),
        &window(50, 5),
        &gateway,
        &index,
    )
    .unwrap();

    let cited = "Start at 500 mg twice daily \
[Section: DOSAGE_AND_ADMINISTRATION] (https://dailymed.example/metformin#section=34068-7).";
    let llm = Arc::new(ScriptedLlm::new(vec![
        Ok(r#"{"drug": "metformin", "sections": ["DOSAGE_AND_ADMINISTRATION"]}"#.to_string()),
        Ok(cited.to_string()),
        Ok(r#"{"drug": "warfarin", "sections": ["CONTRAINDICATIONS"]}"#.to_string()),
    ]));
    let p = pipeline(llm, index.clone());

    let cases = vec![
        EvalCase {
            query: "What is the recommended starting dose of metformin?".to_string(),
            drug: Some("metformin".to_string()),
            expected_section: Some(Section::DosageAndAdministration),
            expected_unit: Some("mg".to_string()),
        },
        EvalCase {
            query: "What are the contraindications for warfarin?".to_string(),
            drug: Some("warfarin".to_string()),
            expected_section: Some(Section::Contraindications),
            expected_unit: None,
        },
        EvalCase {
            query: " ".to_string(),
            drug: None,
            expected_section: None,
            expected_unit: None,
        },
    ];

    let report = run_evals(&p, &cases).expect("report");
    assert_eq!(report.results.len(), 3);

    let first = &report.results[0];
    assert!(first.grounded);
    assert!(first.has_citation);
    assert_eq!(first.section_hit, Some(true));
    assert_eq!(first.unit_hit, Some(true));

    let second = &report.results[1];
    assert!(!second.grounded);
    assert_eq!(second.section_hit, Some(false));

    let third = &report.results[2];
    assert!(third.error.as_deref().unwrap_or_default().contains("QUERY_INVALID"));

    assert!((report.grounding_rate - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(report.section_hit_rate, 0.5);
    assert_eq!(report.unit_hit_rate, 1.0);
    assert!(report.generated_at.ends_with('Z') || report.generated_at.contains('+'));
}

#[test]
fn eval_cases_load_from_a_csv_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cases.csv");
    std::fs::write(
        &path,
        "query,drug,expected_section,expected_unit\nHow should levothyroxine be stored?,levothyroxine,HOW_SUPPLIED_STORAGE_AND_HANDLING,\n",
    )
    .unwrap();

    let cases = load_eval_cases_csv(&path).unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].expected_section, Some(Section::HowSuppliedStorageAndHandling));
    assert_eq!(cases[0].expected_unit, None);

    let missing = load_eval_cases_csv(&dir.path().join("nope.csv")).unwrap_err();
    assert_eq!(missing.code, "EVAL_CSV_READ_FAILED");
}

#[test]
fn pipeline_config_follows_settings() {
    let mut settings = rxqa_core::config::Settings::default();
    settings.retrieval_top_k = 3;
    settings.confidence_threshold = 0.5;
    let cfg = PipelineConfig::from_settings(&settings);
    assert_eq!(cfg.retrieval_top_k, 3);

    let p = Pipeline::new(
        Arc::new(ScriptedLlm::default()),
        EmbeddingGateway::new(Arc::new(LetterEmbedder::default())),
        ready_index(DIMS),
        cfg,
    );
    assert_eq!(p.config().confidence_threshold, 0.5);
}

#[test]
fn settings_build_a_pipeline_over_an_on_disk_index() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = rxqa_core::config::Settings::default();
    settings.index_path = dir.path().join("labels.sqlite");
    settings.embedding_dim = DIMS;
    settings.chunk_size = 10;
    settings.chunk_overlap = 2;
    settings.retrieval_top_k = 4;

    let p = Pipeline::from_settings(&settings).expect("pipeline");
    assert!(settings.index_path.exists());
    assert_eq!(p.index().dims(), DIMS);
    assert_eq!(p.config().retrieval_top_k, 4);

    let long_dosage = (0..25).map(|i| format!("dose{i}")).collect::<Vec<_>>().join(" ");
    let summary = ingest_document(
        &metformin_label(1, &long_dosage),
        &VocabTokenizer::default(),
        &ChunkConfig::from_settings(&settings),
        &EmbeddingGateway::new(Arc::new(LetterEmbedder::default())),
        p.index(),
    )
    .unwrap();
    assert_eq!(summary.chunks, 4);

    settings.embedding_dim = 8;
    let err = Pipeline::from_settings(&settings).err().expect("dimension mismatch");
    assert_eq!(err.code, "INDEX_DIMENSION_MISMATCH");

    settings.chunk_overlap = 10;
    let err = Pipeline::from_settings(&settings).err().expect("invalid settings");
    assert_eq!(err.code, "CONFIG_INVALID");
}
