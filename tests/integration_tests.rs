mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use common::*;
use report_forge::config::{ConfigError, RunRequest};
use report_forge::controller::ControllerError;
use report_forge::controller::events::ProgressEvent;
use report_forge::generator::workflow::state::RunState;
use report_forge::llm::client::LlmError;

const A1: &str = "https://www.catster.com/sleep-one";
const A2: &str = "https://www.catster.com/sleep-two";
const A3: &str = "https://www.catster.com/sleep-three";
const A4: &str = "https://www.catster.com/diet-four";
const T1: &str = "https://old.reddit.com/r/cats/comments/abc123/why_do_cats_nap/";

fn summary_reply(url: &str, filler: usize) -> String {
    format!(
        "<toolScrapeSummary>Key findings from {}: {}</toolScrapeSummary>",
        url,
        "cats nap. ".repeat(filler)
    )
}

/// 按prompt的类型作答；摘要与评分根据prompt里出现的URL决定
fn pipeline_llm(scores: Vec<(&'static str, u8)>, filler: usize) -> Arc<ScriptedLlm> {
    let urls: Vec<&'static str> = scores.iter().map(|(u, _)| *u).collect();
    ScriptedLlm::new(move |prompt| {
        if prompt.contains("Suggest the most authoritative") {
            return Ok("<toolWebsites>\nhttps://www.catster.com\nr/cats\n</toolWebsites>".to_string());
        }
        if prompt.contains("You are an expert research analyst") {
            return Ok("<reportContent># Cats\n\nCats nap often [Summary_1].</reportContent>".to_string());
        }
        if prompt.contains("You are a senior editor") {
            return Ok(
                "<refinedReport># Cats and Sleep\n\n## Executive Summary\nCats nap often.</refinedReport>"
                    .to_string(),
            );
        }
        let url = url_in(prompt, &urls).ok_or_else(|| LlmError::Request("unexpected prompt".into()))?;
        if prompt.contains("You are summarizing") {
            return Ok(summary_reply(url, filler));
        }
        if prompt.contains("Rate how relevant") {
            let score = scores.iter().find(|(u, _)| *u == url).map(|(_, s)| *s).unwrap_or(0);
            return Ok(format!("<summaryScore>{}</summaryScore>", score));
        }
        Err(LlmError::Request("unexpected prompt".into()))
    })
}

fn long_body(topic: &str) -> String {
    format!(
        "{} Cats spend a large part of the day asleep, and owners often wonder whether this is normal. \
         Veterinarians explain that cats are crepuscular and conserve energy between bursts of activity.",
        topic
    )
}

fn direct_file(root: &std::path::Path, lines: &[&str]) -> std::path::PathBuf {
    let path = root.join("urls.txt");
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

#[tokio::test]
async fn test_search_pipeline_end_to_end() {
    let root = TempDir::new().unwrap();
    let search = FakeSearch::default()
        .with("site:catster.com sleep", &[A1, A2, A3])
        .with("site:catster.com diet", &[A2, A4]);
    let fetcher = FakeFetcher::default()
        .with_page(A1, article_html("Sleep one", &long_body("One.")))
        .with_page(A2, article_html("Sleep two", &long_body("Two.")))
        .with_page(A3, article_html("Sleep three", &long_body("Three.")))
        .with_page(A4, article_html("Diet four", &long_body("Four.")));
    let browser = FakeBrowser::default().with_thread(
        T1,
        FakeThread {
            title: "Why do cats nap so much?".into(),
            body: "My cat sleeps nearly all day and only wakes up for dinner. Is this normal for an adult cat?".into(),
            comments: vec![
                "Totally normal, mine sleeps 16 hours.".into(),
                "[deleted]".into(),
                "Cats conserve energy for hunting.".into(),
            ],
        },
    );
    let llm = pipeline_llm(vec![(A1, 8), (A2, 5), (T1, 7)], 3);
    let harness = Harness::new(root.path(), llm.clone(), search, fetcher, browser, 32_000);

    let request = RunRequest {
        keywords: vec!["sleep".into(), "diet".into()],
        max_web_results: 2,
        per_keyword_results: Some(3),
        score_threshold: 6,
        ..RunRequest::new("Cats")
    };
    let handle = harness.controller.start(request).unwrap();
    let events = handle.subscribe().await;
    assert_eq!(handle.wait().await, RunState::Completed);
    let events = drain(events).await;

    // 每个关键词一次请求，每次请求3条结果；域内合并去重后只保留前2条
    let queries = harness.search.queries();
    let texts: Vec<&str> = queries.iter().map(|q| q.text.as_str()).collect();
    assert_eq!(texts, vec!["site:catster.com sleep", "site:catster.com diet"]);
    assert!(queries.iter().all(|q| q.num_results == 3));
    let fetched: BTreeSet<String> = harness.fetcher.fetched().into_iter().collect();
    assert_eq!(fetched, BTreeSet::from([A1.to_string(), A2.to_string()]));
    assert_eq!(harness.fetcher.probed(), vec!["https://www.catster.com".to_string()]);

    // 浏览器只启动一次，Run结束时关闭
    assert_eq!(harness.browser.launches(), 1);
    assert_eq!(harness.browser.closes(), 1);

    let dir = archive_dir(root.path());
    let report = std::fs::read_to_string(dir.join("report.md")).unwrap();
    assert!(report.starts_with("# Cats and Sleep"));
    assert!(report.contains("## References"));
    assert!(report.contains(A1));
    assert!(report.contains(T1));
    assert!(!report.contains(A2), "item scored below the threshold must not be referenced");

    let draft = std::fs::read_to_string(dir.join("report_draft.md")).unwrap();
    assert!(draft.contains(&format!("Summary_1 = {}", A1)));
    assert!(draft.contains(&format!("Summary_2 = {}", T1)));

    let summaries = std::fs::read_to_string(dir.join("summaries.jsonl")).unwrap();
    assert_eq!(summaries.lines().count(), 3);
    let prompts = std::fs::read_dir(dir.join("prompts")).unwrap().count();
    assert_eq!(prompts, llm.prompts().len());

    let manifest = read_manifest(&dir);
    assert_eq!(manifest["outcome"], "completed");
    assert_eq!(manifest["counts"]["items"], 3);
    assert_eq!(manifest["counts"]["retained"], 2);
    assert_eq!(manifest["counts"]["dropped"], 1);

    match events.last() {
        Some(ProgressEvent::Complete(files)) => {
            assert!(files.contains(&dir.join("report.md")));
            assert!(files.iter().any(|f| f.starts_with(root.path().join("outputs"))));
        }
        other => panic!("unexpected final event: {:?}", other),
    }
}

#[tokio::test]
async fn test_reference_document_only_run() {
    let root = TempDir::new().unwrap();
    let doc = root.path().join("notes.txt");
    std::fs::write(&doc, "Cats sleep 16 hours a day").unwrap();

    let llm = ScriptedLlm::new(|prompt| {
        if prompt.contains("You are an expert research analyst") && prompt.contains("Cats sleep 16 hours a day") {
            Ok("<reportContent># Cats\n\nCats sleep 16 hours a day.</reportContent>".to_string())
        } else {
            Err(LlmError::Request("unexpected prompt".into()))
        }
    });
    let harness = Harness::new(
        root.path(),
        llm.clone(),
        FakeSearch::default(),
        FakeFetcher::default(),
        FakeBrowser::default(),
        32_000,
    );

    let handle = harness
        .controller
        .start(RunRequest {
            no_search: true,
            skip_refinement: true,
            reference_docs: vec![doc],
            ..RunRequest::new("Cats")
        })
        .unwrap();
    assert_eq!(handle.wait().await, RunState::Completed);

    let report = std::fs::read_to_string(archive_dir(root.path()).join("report.md")).unwrap();
    assert!(report.contains("16 hours"));
    assert!(report.ends_with("## References\n1. notes.txt"));

    // 没有任何网络访问，也没有摘要与评分
    assert!(harness.search.queries().is_empty());
    assert!(harness.fetcher.fetched().is_empty());
    assert!(harness.fetcher.probed().is_empty());
    assert_eq!(harness.browser.launches(), 0);
    assert_eq!(llm.prompts().len(), 1);
}

#[tokio::test]
async fn test_direct_urls_are_deduplicated() {
    let root = TempDir::new().unwrap();
    let a = "https://example.com/a";
    let b = "https://example.com/b";
    let urls = direct_file(
        root.path(),
        &[a, "https://example.com/a/", "https://EXAMPLE.com/a#top", "not a url", b],
    );
    let fetcher = FakeFetcher::default()
        .with_page(a, article_html("A", &long_body("A.")))
        .with_page(b, article_html("B", &long_body("B.")));
    let harness = Harness::new(
        root.path(),
        pipeline_llm(vec![(a, 9), (b, 9)], 3),
        FakeSearch::default(),
        fetcher,
        FakeBrowser::default(),
        32_000,
    );

    let handle = harness
        .controller
        .start(RunRequest {
            no_search: true,
            skip_refinement: true,
            direct_articles: Some(urls),
            ..RunRequest::new("Cats")
        })
        .unwrap();
    assert_eq!(handle.wait().await, RunState::Completed);

    let mut fetched = harness.fetcher.fetched();
    fetched.sort();
    assert_eq!(fetched, vec![a.to_string(), b.to_string()]);
}

#[tokio::test]
async fn test_cancel_during_scraping_keeps_partial_archive() {
    let root = TempDir::new().unwrap();
    let urls = direct_file(
        root.path(),
        &["https://example.com/1", "https://example.com/2", "https://example.com/3"],
    );
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = FakeFetcher::default()
        .with_page("https://example.com/1", article_html("1", &long_body("1.")))
        .with_page("https://example.com/2", article_html("2", &long_body("2.")))
        .with_page("https://example.com/3", article_html("3", &long_body("3.")))
        .gated(gate.clone());
    let entered = fetcher.entered.clone();

    let mut config = test_config(root.path());
    config.scraper.max_parallels = 1;
    let llm = pipeline_llm(vec![], 3);
    let harness = Harness::with_config(
        config,
        llm.clone(),
        FakeSearch::default(),
        fetcher,
        FakeBrowser::default(),
        32_000,
    );

    let handle = harness
        .controller
        .start(RunRequest {
            no_search: true,
            direct_articles: Some(urls),
            ..RunRequest::new("Cats")
        })
        .unwrap();
    let events = handle.subscribe().await;

    // 第一个抓取进行中时取消，然后放行
    entered.notified().await;
    handle.cancel();
    gate.add_permits(10);

    assert_eq!(handle.wait().await, RunState::Cancelled);
    assert_eq!(harness.fetcher.fetched().len(), 1, "no new fetch may start after cancel");
    assert!(llm.prompts().is_empty());

    let dir = archive_dir(root.path());
    assert!(!dir.join("report.md").exists());
    assert!(dir.join("run.log").exists());
    assert_eq!(read_manifest(&dir)["outcome"], "cancelled");

    let events = drain(events).await;
    assert_eq!(events.last(), Some(&ProgressEvent::Error("run cancelled".to_string())));
}

#[tokio::test]
async fn test_unparseable_draft_fails_with_archive() {
    let root = TempDir::new().unwrap();
    let doc = root.path().join("notes.txt");
    std::fs::write(&doc, "Cats sleep 16 hours a day").unwrap();

    let llm = ScriptedLlm::new(|_| Ok("I cannot write that report.".to_string()));
    let harness = Harness::new(
        root.path(),
        llm.clone(),
        FakeSearch::default(),
        FakeFetcher::default(),
        FakeBrowser::default(),
        32_000,
    );

    let handle = harness
        .controller
        .start(RunRequest {
            no_search: true,
            reference_docs: vec![doc],
            ..RunRequest::new("Cats")
        })
        .unwrap();
    let events = handle.subscribe().await;
    assert_eq!(handle.wait().await, RunState::Failed);

    // 草稿按 parse_retry_attempts 重新询问
    assert_eq!(llm.prompts().len(), 2);

    let dir = archive_dir(root.path());
    assert!(!dir.join("report.md").exists());
    let manifest = read_manifest(&dir);
    assert_eq!(manifest["outcome"], "failed");
    assert!(manifest["message"].as_str().unwrap().contains("draft"));

    match drain(events).await.last() {
        Some(ProgressEvent::Error(message)) => assert!(message.contains("draft")),
        other => panic!("unexpected final event: {:?}", other),
    }
}

#[tokio::test]
async fn test_nothing_gathered_is_fatal() {
    let root = TempDir::new().unwrap();
    let urls = direct_file(root.path(), &["https://example.com/missing"]);
    let harness = Harness::new(
        root.path(),
        pipeline_llm(vec![], 3),
        FakeSearch::default(),
        FakeFetcher::default(),
        FakeBrowser::default(),
        32_000,
    );

    let handle = harness
        .controller
        .start(RunRequest {
            no_search: true,
            direct_articles: Some(urls),
            ..RunRequest::new("Cats")
        })
        .unwrap();
    assert_eq!(handle.wait().await, RunState::Failed);

    let manifest = read_manifest(&archive_dir(root.path()));
    assert!(manifest["message"].as_str().unwrap().contains("no content"));
}

#[tokio::test]
async fn test_context_is_truncated_to_the_model_budget() {
    let root = TempDir::new().unwrap();
    let x1 = "https://example.com/x-one";
    let x2 = "https://example.com/x-two";
    let x3 = "https://example.com/x-three";
    let urls = direct_file(root.path(), &[x1, x2, x3]);
    let fetcher = FakeFetcher::default()
        .with_page(x1, article_html("1", &long_body("1.")))
        .with_page(x2, article_html("2", &long_body("2.")))
        .with_page(x3, article_html("3", &long_body("3.")));
    let llm = pipeline_llm(vec![(x1, 9), (x2, 8), (x3, 7)], 120);
    let harness = Harness::new(
        root.path(),
        llm.clone(),
        FakeSearch::default(),
        fetcher,
        FakeBrowser::default(),
        1000,
    );

    let handle = harness
        .controller
        .start(RunRequest {
            no_search: true,
            skip_refinement: true,
            direct_articles: Some(urls),
            ..RunRequest::new("Cats")
        })
        .unwrap();
    assert_eq!(handle.wait().await, RunState::Completed);

    // 只有最高分的摘要留在草稿上下文中
    let drafts = llm.prompts_containing("You are an expert research analyst");
    assert_eq!(drafts.len(), 1);
    assert!(drafts[0].contains(x1));
    assert!(!drafts[0].contains(x2));
    assert!(!drafts[0].contains(x3));

    let report = std::fs::read_to_string(archive_dir(root.path()).join("report.md")).unwrap();
    assert!(report.contains(&format!("## References\n1. {}", x1)));
}

#[tokio::test]
async fn test_invalid_request_touches_nothing() {
    let root = TempDir::new().unwrap();
    let llm = pipeline_llm(vec![], 3);
    let harness = Harness::new(
        root.path(),
        llm.clone(),
        FakeSearch::default(),
        FakeFetcher::default(),
        FakeBrowser::default(),
        32_000,
    );

    let result = harness.controller.start(RunRequest {
        no_search: true,
        ..RunRequest::new("Cats")
    });
    assert!(matches!(result, Err(ControllerError::Config(ConfigError::NoSources))));

    let result = harness.controller.start(RunRequest::new("Cats"));
    assert!(matches!(result, Err(ControllerError::Config(ConfigError::MissingKeywords))));

    assert!(llm.prompts().is_empty());
    assert!(harness.search.queries().is_empty());
    assert!(harness.fetcher.fetched().is_empty());
    assert!(!root.path().join("archive").exists());
}

#[tokio::test]
async fn test_runs_are_sequential() {
    let root = TempDir::new().unwrap();
    let doc = root.path().join("notes.txt");
    std::fs::write(&doc, "Cats sleep 16 hours a day").unwrap();
    let llm = ScriptedLlm::new(|_| Ok("<reportContent># Cats</reportContent>".to_string()));
    let harness = Harness::new(
        root.path(),
        llm,
        FakeSearch::default(),
        FakeFetcher::default(),
        FakeBrowser::default(),
        32_000,
    );
    let request = RunRequest {
        no_search: true,
        skip_refinement: true,
        reference_docs: vec![doc],
        ..RunRequest::new("Cats")
    };

    let first = harness.controller.start(request.clone()).unwrap();
    assert!(matches!(
        harness.controller.start(request.clone()),
        Err(ControllerError::AlreadyRunning)
    ));
    assert_eq!(first.wait().await, RunState::Completed);

    let second = harness.controller.start(request).unwrap();
    assert_eq!(second.wait().await, RunState::Completed);
    assert_ne!(first.id(), second.id());

    // 每次Run各有自己的归档目录，即使在同一秒内开始
    let dirs: Vec<std::path::PathBuf> = std::fs::read_dir(root.path().join("archive"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(dirs.len(), 2);
    let run_ids: BTreeSet<String> = dirs
        .iter()
        .map(|dir| {
            assert_eq!(std::fs::read_dir(dir.join("prompts")).unwrap().count(), 1);
            read_manifest(dir)["run_id"].as_str().unwrap().to_string()
        })
        .collect();
    let expected: BTreeSet<String> = [first.id().to_string(), second.id().to_string()]
        .into_iter()
        .collect();
    assert_eq!(run_ids, expected);
}

#[tokio::test]
async fn test_unparseable_score_is_not_replayed_from_cache() {
    let root = TempDir::new().unwrap();
    let filler = "Owners report the same pattern across breeds, ages and households in every survey.";
    let doc_a = root.path().join("a.txt");
    let doc_b = root.path().join("b.txt");
    std::fs::write(&doc_a, format!("DOC-A: cats sleep 16 hours a day. {}", filler)).unwrap();
    std::fs::write(&doc_b, format!("DOC-B: kittens sleep even longer. {}", filler)).unwrap();

    let b_scores = Arc::new(std::sync::Mutex::new(0usize));
    let counter = b_scores.clone();
    let llm = ScriptedLlm::new(move |prompt| {
        let marker = if prompt.contains("DOC-A") { "DOC-A" } else { "DOC-B" };
        if prompt.contains("You are summarizing") {
            return Ok(format!(
                "<toolScrapeSummary>{} says cats sleep a lot.</toolScrapeSummary>",
                marker
            ));
        }
        if prompt.contains("Rate how relevant") {
            if marker == "DOC-A" {
                return Ok("<summaryScore>7</summaryScore>".to_string());
            }
            let mut calls = counter.lock().unwrap();
            *calls += 1;
            return Ok(if *calls == 1 {
                "Score: high".to_string()
            } else {
                "<summaryScore>8</summaryScore>".to_string()
            });
        }
        Ok("<reportContent># Cats</reportContent>".to_string())
    });

    let mut config = test_config(root.path());
    config.cache.enabled = true;
    let harness = Harness::with_config(
        config,
        llm.clone(),
        FakeSearch::default(),
        FakeFetcher::default(),
        FakeBrowser::default(),
        32_000,
    );
    let request = RunRequest {
        no_search: true,
        skip_refinement: true,
        summarize_reference_docs: true,
        reference_docs: vec![doc_a, doc_b],
        ..RunRequest::new("Cats")
    };

    let first = harness.controller.start(request.clone()).unwrap();
    assert_eq!(first.wait().await, RunState::Completed);
    let warnings: Vec<String> = drain(harness.controller.subscribe(&first).await)
        .await
        .into_iter()
        .filter_map(|event| match event {
            ProgressEvent::Output(line) if line.contains("DOC-B") || line.contains("b.txt") => Some(line),
            _ => None,
        })
        .filter(|line| line.starts_with("⚠️"))
        .collect();
    assert_eq!(warnings.len(), 1, "{:?}", warnings);

    let second = harness.controller.start(request).unwrap();
    assert_eq!(second.wait().await, RunState::Completed);

    // 第二次Run重新询问 DOC-B 的评分，DOC-A 的评分与两份摘要来自缓存
    assert_eq!(*b_scores.lock().unwrap(), 2);
    assert_eq!(llm.prompts_containing("You are summarizing").len(), 2);
    assert_eq!(llm.prompts_containing("Rate how relevant").len(), 3);

    let mut dirs: Vec<std::path::PathBuf> = std::fs::read_dir(root.path().join("archive"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    dirs.sort();
    assert_eq!(read_manifest(&dirs[0])["counts"]["retained"], 1);
    assert_eq!(read_manifest(&dirs[1])["counts"]["retained"], 2);
}
