use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};
use pretty_assertions::assert_eq;
use serde_json::json;
use statline::checkpoint::{read_json, write_json_atomic};
use statline::embedder::{IndexedEmbedding, ALL_EMBEDDED_FILE};
use statline::{
    Category, Document, EmbeddedDocument, EmbeddingBatcher, EmbeddingService, EmbeddingStage,
    FailurePolicy,
};

/// Answers with indices out of order, like a service that streams results.
struct Shuffled;

impl EmbeddingService for Shuffled {
    fn embed(&self, texts: &[&str]) -> Result<Vec<IndexedEmbedding>> {
        let mut data: Vec<IndexedEmbedding> = texts
            .iter()
            .enumerate()
            .map(|(index, text)| IndexedEmbedding {
                index,
                embedding: vec![text.len() as f32, index as f32],
            })
            .collect();
        data.rotate_right(1);
        Ok(data)
    }
}

/// Fails every request whose batch contains `poison`.
struct Poisoned {
    poison: &'static str,
    calls: AtomicUsize,
}

impl EmbeddingService for Poisoned {
    fn embed(&self, texts: &[&str]) -> Result<Vec<IndexedEmbedding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if texts.contains(&self.poison) {
            return Err(anyhow!("server error"));
        }
        Ok(texts
            .iter()
            .enumerate()
            .map(|(index, _)| IndexedEmbedding {
                index,
                embedding: vec![0.5; 4],
            })
            .collect())
    }
}

fn batcher(batch_size: usize) -> EmbeddingBatcher {
    EmbeddingBatcher {
        batch_size,
        retry_limit: 3,
        retry_delay: Duration::ZERO,
        pacing: Duration::ZERO,
        expected_dimension: None,
        failure_policy: FailurePolicy::Drop,
    }
}

fn doc(text: &str) -> Document {
    Document::new(text.to_string(), Category::Player, "2544", "all", json!({"doc_type": "basic_info"}))
}

#[test]
fn vectors_follow_input_order() {
    let out = batcher(3)
        .embed_texts(&Shuffled, &["a", "bb", "ccc"])
        .expect("embed");
    let vectors: Vec<Vec<f32>> = out.into_iter().map(|v| v.expect("vector")).collect();
    assert_eq!(
        vectors,
        vec![vec![1.0, 0.0], vec![2.0, 1.0], vec![3.0, 2.0]]
    );
}

#[test]
fn one_failing_batch_drops_only_its_documents() {
    let texts: Vec<String> = (0..10).map(|i| format!("doc {i}")).collect();
    let service = Poisoned {
        poison: "doc 5",
        calls: AtomicUsize::new(0),
    };
    let docs: Vec<Document> = texts.iter().map(|t| doc(t)).collect();
    let embedded = batcher(2).embed_documents(&service, docs).expect("embed");

    assert_eq!(embedded.len(), 8);
    assert!(embedded
        .iter()
        .all(|d| d.document.text != "doc 4" && d.document.text != "doc 5"));
    assert_eq!(service.calls.load(Ordering::SeqCst), 4 + 3);
}

#[test]
fn all_files_mode_skips_bad_inputs() {
    let processed = tempfile::tempdir().expect("processed");
    let embeddings = tempfile::tempdir().expect("embeddings");
    write_json_atomic(
        &processed.path().join("processed_players.json"),
        &vec![doc("LeBron James"), doc("Stephen Curry")],
    )
    .expect("players");
    write_json_atomic(&processed.path().join("processed_teams.json"), &vec![doc("Celtics")])
        .expect("teams");
    fs::write(processed.path().join("processed_games.json"), "{not json").expect("games");
    fs::write(processed.path().join("notes.txt"), "ignored").expect("notes");

    let stage = EmbeddingStage::new(
        Shuffled,
        batcher(10),
        processed.path().to_path_buf(),
        embeddings.path().to_path_buf(),
    );
    let all = stage.process_all_files().expect("all files");
    assert_eq!(all.len(), 3);

    let players: Vec<EmbeddedDocument> =
        read_json(&embeddings.path().join("embedded_processed_players.json")).expect("players");
    assert_eq!(players[1].document.text, "Stephen Curry");
    assert_eq!(players[1].embedding, vec![13.0, 1.0]);
    assert!(!embeddings.path().join("embedded_processed_games.json").exists());

    let combined: Vec<EmbeddedDocument> =
        read_json(&embeddings.path().join(ALL_EMBEDDED_FILE)).expect("combined");
    assert_eq!(combined, all);
}

#[test]
fn empty_input_writes_nothing() {
    let processed = tempfile::tempdir().expect("processed");
    let embeddings = tempfile::tempdir().expect("embeddings");
    write_json_atomic(&processed.path().join("processed_league.json"), &Vec::<Document>::new())
        .expect("seed");

    let stage = EmbeddingStage::new(
        Shuffled,
        batcher(10),
        processed.path().to_path_buf(),
        embeddings.path().to_path_buf(),
    );
    let out = stage.process_file("processed_league.json").expect("empty");
    assert!(out.is_empty());
    assert!(!embeddings
        .path()
        .join("embedded_processed_league.json")
        .exists());
}

/// Returns an empty vector for "bad" and a 3-d vector for everything else.
struct Degenerate;

impl EmbeddingService for Degenerate {
    fn embed(&self, texts: &[&str]) -> Result<Vec<IndexedEmbedding>> {
        Ok(texts
            .iter()
            .enumerate()
            .map(|(index, text)| IndexedEmbedding {
                index,
                embedding: if *text == "bad" { Vec::new() } else { vec![1.0, 2.0, 3.0] },
            })
            .collect())
    }
}

#[test]
fn empty_first_vector_does_not_fix_the_dimension() {
    let out = batcher(2)
        .embed_texts(&Degenerate, &["bad", "a", "b", "c"])
        .expect("embed");
    let kept: Vec<bool> = out.iter().map(Option::is_some).collect();
    assert_eq!(kept, vec![false, true, true, true]);
}

#[test]
fn lone_empty_batch_leaves_later_batches_intact() {
    let out = batcher(1)
        .embed_texts(&Degenerate, &["bad", "a", "bad", "b"])
        .expect("embed");
    let kept: Vec<bool> = out.iter().map(Option::is_some).collect();
    assert_eq!(kept, vec![false, true, false, true]);
}
