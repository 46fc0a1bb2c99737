use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use httptest::responders::status_code;
use httptest::{Expectation, Server, matchers::*};

use dirprobe::{
    Blacklists, Config, Dictionary, ExclusionFilter, Fuzzer, HttpRequester, Requester,
    WafClassifier,
};

fn create_temp_wordlist(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write to temp file");
    file
}

fn build_fuzzer(
    server: &Server,
    wordlist: &tempfile::NamedTempFile,
    config: Config,
) -> (
    Fuzzer<HttpRequester>,
    Arc<Dictionary>,
    Arc<Mutex<Vec<String>>>,
    Arc<Mutex<Vec<String>>>,
) {
    let config = Arc::new(Config {
        wordlists: vec![wordlist.path().to_path_buf()],
        ..config
    });

    let mut requester = HttpRequester::new(&config).expect("build requester");
    requester
        .set_url(&server.url("/").to_string())
        .expect("set url");

    let dictionary = Arc::new(
        Dictionary::new(config.wordlists.clone(), &config).expect("build dictionary"),
    );
    let filter = ExclusionFilter::new(&config, Blacklists::new()).expect("build filter");

    let mut fuzzer = Fuzzer::new(
        Arc::new(requester),
        Arc::clone(&dictionary),
        filter,
        WafClassifier::default(),
        config,
        "",
    );

    let matches = Arc::new(Mutex::new(Vec::new()));
    let not_found = Arc::new(Mutex::new(Vec::new()));
    {
        let matches = Arc::clone(&matches);
        fuzzer.on_match(move |response| {
            matches.lock().unwrap().push(response.path.clone());
        });
        let not_found = Arc::clone(&not_found);
        fuzzer.on_not_found(move |response| {
            not_found.lock().unwrap().push(response.path.clone());
        });
    }

    (fuzzer, dictionary, matches, not_found)
}

fn catch_all_404(server: &Server, except: &'static str) {
    server.expect(
        Expectation::matching(all_of(vec![
            Box::new(request::method("GET")),
            Box::new(not(request::path(except))),
        ]))
        .times(..)
        .respond_with(status_code(404).body("not found")),
    );
}

#[tokio::test]
async fn basic_discovery_reports_the_distinguishable_path() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/admin"))
            .times(1)
            .respond_with(status_code(200).body("admin area")),
    );
    catch_all_404(&server, "/admin");

    let wordlist = create_temp_wordlist("admin\nuser\n%EXT%\n");
    let config = Config {
        extensions: vec!["php".to_string(), "html".to_string()],
        thread_count: 2,
        ..Config::default()
    };
    let (mut fuzzer, _dictionary, matches, not_found) = build_fuzzer(&server, &wordlist, config);

    fuzzer.run().await.expect("scan");
    assert!(fuzzer.is_finished());

    let matches = matches.lock().unwrap();
    assert_eq!(matches.as_slice(), ["/admin"]);

    let not_found = not_found.lock().unwrap();
    for suppressed in ["/user", "/php", "/html"] {
        assert!(
            not_found.iter().any(|path| path == suppressed),
            "expected a not-found callback for {suppressed}"
        );
    }
}

#[tokio::test]
async fn forced_extensions_probe_every_variant() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/admin.php"))
            .times(1)
            .respond_with(status_code(200).body("<?php panel")),
    );
    catch_all_404(&server, "/admin.php");

    let wordlist = create_temp_wordlist("admin\nuser\n");
    let config = Config {
        extensions: vec!["php".to_string(), "html".to_string()],
        force_extensions: true,
        thread_count: 2,
        ..Config::default()
    };
    let (mut fuzzer, _dictionary, matches, not_found) = build_fuzzer(&server, &wordlist, config);

    fuzzer.run().await.expect("scan");

    assert_eq!(matches.lock().unwrap().as_slice(), ["/admin.php"]);

    // every expansion of the wordlist was actually requested
    let not_found = not_found.lock().unwrap();
    for suppressed in [
        "/admin", "/admin/", "/admin.html", "/user", "/user/", "/user.php", "/user.html",
    ] {
        assert!(
            not_found.iter().any(|path| path == suppressed),
            "expected a request for {suppressed}"
        );
    }
}

#[tokio::test]
async fn transforms_replace_the_untransformed_candidate() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/admin"))
            .times(0)
            .respond_with(status_code(200)),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/pre_admin"))
            .times(1)
            .respond_with(status_code(404).body("not found")),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/admin_suf"))
            .times(1)
            .respond_with(status_code(404).body("not found")),
    );
    server.expect(
        Expectation::matching(all_of(vec![
            Box::new(request::method("GET")),
            Box::new(not(request::path(matches(r"^/(admin|pre_admin|admin_suf)$")))),
        ]))
        .times(..)
        .respond_with(status_code(404).body("not found")),
    );

    let wordlist = create_temp_wordlist("admin\n");
    let config = Config {
        prefixes: vec!["pre_".to_string()],
        suffixes: vec!["_suf".to_string()],
        thread_count: 1,
        ..Config::default()
    };
    let (mut fuzzer, _dictionary, matches_seen, _) = build_fuzzer(&server, &wordlist, config);

    fuzzer.run().await.expect("scan");
    assert!(matches_seen.lock().unwrap().is_empty());
    // httptest verifies the request counts on drop
}

#[tokio::test]
async fn wildcard_responses_are_suppressed() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method("GET"))
            .times(..)
            .respond_with(status_code(200).body("welcome to the site")),
    );

    let words: Vec<String> = (0..200).map(|i| format!("word{i}")).collect();
    let wordlist = create_temp_wordlist(&words.join("\n"));
    let config = Config {
        thread_count: 8,
        ..Config::default()
    };
    let (mut fuzzer, _dictionary, matches, not_found) = build_fuzzer(&server, &wordlist, config);

    fuzzer.run().await.expect("scan");

    assert!(matches.lock().unwrap().is_empty());
    assert_eq!(not_found.lock().unwrap().len(), 200);
}

#[tokio::test]
async fn pausing_and_resuming_loses_nothing() {
    let server = Server::run();
    catch_all_404(&server, "/nothing-matches-this");

    let words: Vec<String> = (0..50).map(|i| format!("word{i}")).collect();
    let wordlist = create_temp_wordlist(&words.join("\n"));
    let config = Config {
        thread_count: 4,
        ..Config::default()
    };
    let (mut fuzzer, _dictionary, _, not_found) = build_fuzzer(&server, &wordlist, config);

    fuzzer.setup().await.expect("setup");
    fuzzer.start();

    fuzzer.pause();
    tokio::time::sleep(Duration::from_millis(50)).await;
    fuzzer.play();

    fuzzer.join().await.expect("join");

    let seen: HashSet<String> = not_found.lock().unwrap().iter().cloned().collect();
    for word in &words {
        assert!(seen.contains(&format!("/{word}")), "missing /{word}");
    }
}

#[tokio::test]
async fn quit_drains_the_pool_early() {
    let server = Server::run();
    catch_all_404(&server, "/nothing-matches-this");

    let words: Vec<String> = (0..5000).map(|i| format!("word{i}")).collect();
    let wordlist = create_temp_wordlist(&words.join("\n"));
    let config = Config {
        thread_count: 2,
        delay: 0.01,
        ..Config::default()
    };
    let (mut fuzzer, _dictionary, _, not_found) = build_fuzzer(&server, &wordlist, config);

    fuzzer.setup().await.expect("setup");
    fuzzer.start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    fuzzer.quit();
    fuzzer.quit(); // idempotent

    tokio::time::timeout(Duration::from_secs(5), fuzzer.join())
        .await
        .expect("workers should exit at their next checkpoint")
        .expect("join");

    assert!(fuzzer.is_finished());
    let seen = not_found.lock().unwrap().len();
    assert!(seen < words.len(), "scan should have stopped early");
}

#[tokio::test]
async fn extra_candidates_jump_the_queue() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/secret/panel"))
            .times(1)
            .respond_with(status_code(200).body("the panel")),
    );
    catch_all_404(&server, "/secret/panel");

    let wordlist = create_temp_wordlist("admin\n");
    let config = Config {
        thread_count: 1,
        ..Config::default()
    };
    let (mut fuzzer, dictionary, matches, not_found) = build_fuzzer(&server, &wordlist, config);
    dictionary.add_extra("secret/panel");

    fuzzer.run().await.expect("scan");

    assert_eq!(matches.lock().unwrap().as_slice(), ["/secret/panel"]);
    assert!(not_found.lock().unwrap().iter().any(|path| path == "/admin"));
}
