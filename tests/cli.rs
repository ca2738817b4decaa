use std::process::Command;

#[test]
fn vectorizer_requires_a_catalog() {
    let output = Command::new(env!("CARGO_BIN_EXE_vectorizer"))
        .env_remove("MONGO_URI")
        .env_remove("VISUAL_SEARCH_CATALOG")
        .env("RUST_LOG", "off")
        .output()
        .expect("run vectorizer");

    assert!(!output.status.success(), "vectorizer should fail without a catalog");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("MONGO_URI"), "unexpected stderr: {stderr}");
}

#[test]
fn binaries_document_their_options() {
    let output = Command::new(env!("CARGO_BIN_EXE_search-api"))
        .arg("--help")
        .output()
        .expect("run search-api");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--bind", "--vectors", "--default-top-k", "--weights"] {
        assert!(stdout.contains(flag), "missing {flag} in help:\n{stdout}");
    }

    let output = Command::new(env!("CARGO_BIN_EXE_vectorizer"))
        .arg("--help")
        .output()
        .expect("run vectorizer");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--mongo-uri", "--catalog-file", "--output", "--fetch-timeout-secs"] {
        assert!(stdout.contains(flag), "missing {flag} in help:\n{stdout}");
    }
}
