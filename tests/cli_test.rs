//! CLI integration tests.
//!
//! These run the actual binary to check argument parsing, error reporting
//! and end-to-end workflows.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

mod common;
use common::*;

const CONTACT: &str = "Contact jane@example.com or call 555-123-4567, card 4111111111111111";

/// Creates a test Command for the docredact binary.
fn docredact_cmd() -> Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("docredact");
    cmd.env_remove("DOCREDACT_CONFIG");
    cmd
}

/// Tests basic CLI argument parsing and help output.
mod argument_parsing {
    use super::*;

    #[test]
    fn test_help_flag() {
        docredact_cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("detect"))
            .stdout(predicate::str::contains("redact"))
            .stdout(predicate::str::contains("extract"))
            .stdout(predicate::str::contains("validate"))
            .stdout(predicate::str::contains("--config"));
    }

    #[test]
    fn test_version_flag() {
        docredact_cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("docredact"))
            .stdout(predicate::str::contains("0.1.0"));
    }

    #[test]
    fn test_missing_subcommand() {
        docredact_cmd().assert().failure();
    }

    #[test]
    fn test_unknown_rule() {
        docredact_cmd()
            .args(["detect", "--text", "x", "--rules", "email,bogus"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown rule"));
    }

    #[test]
    fn test_detect_requires_input() {
        docredact_cmd().arg("detect").assert().failure();
    }
}

/// Tests the detect subcommand.
mod detect {
    use super::*;

    #[test]
    fn test_tokenize_inline_text() {
        docredact_cmd()
            .args([
                "detect",
                "--text",
                CONTACT,
                "--rules",
                "email,phone,credit_card",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "Contact [EMAIL] or call [PHONE], card [CREDIT_CARD]",
            ));
    }

    #[test]
    fn test_json_output() {
        let output = docredact_cmd()
            .args([
                "detect",
                "--text",
                CONTACT,
                "--rules",
                "email,phone,credit_card",
                "--json",
            ])
            .output()
            .unwrap();
        assert!(output.status.success());

        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["stats"]["total"], 3);
        assert_eq!(report["stats"]["byType"]["EMAIL"], 1);
        assert_eq!(report["matches"][0]["ruleId"], "EMAIL");
        assert_eq!(report["matches"][0]["start"], 8);
        assert_eq!(report["matches"][0]["end"], 24);
    }

    #[test]
    fn test_mask_file_input() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("note.txt");
        fs::write(&input, "write to jane@example.com").unwrap();

        docredact_cmd()
            .arg("detect")
            .arg(input.as_os_str())
            .args(["--strategy", "mask", "--rules", "email"])
            .assert()
            .success()
            .stdout(predicate::str::contains("write to xxxxxxxxxxxxxxxx"));
    }

    #[test]
    fn test_config_file_sets_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = temp_dir.path().join("docredact.toml");
        fs::write(
            &config,
            "rules = [\"EMAIL\"]\nstrategy = \"underline\"\nunderline_delimiter = \"**\"\n",
        )
        .unwrap();

        docredact_cmd()
            .arg("--config")
            .arg(config.as_os_str())
            .args(["detect", "--text", CONTACT])
            .assert()
            .success()
            .stdout(predicate::str::contains("**jane@example.com**"))
            .stdout(predicate::str::contains("555-123-4567"));
    }

    #[test]
    fn test_config_from_environment() {
        let temp_dir = TempDir::new().unwrap();
        let config = temp_dir.path().join("docredact.toml");
        fs::write(&config, "rules = [\"PHONE\"]\n").unwrap();

        docredact_cmd()
            .env("DOCREDACT_CONFIG", config.as_os_str())
            .args(["detect", "--text", CONTACT])
            .assert()
            .success()
            .stdout(predicate::str::contains("call [PHONE]"))
            .stdout(predicate::str::contains("jane@example.com"));
    }

    #[test]
    fn test_invalid_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = temp_dir.path().join("docredact.toml");
        fs::write(&config, "max_page_workers = 0\n").unwrap();

        docredact_cmd()
            .arg("--config")
            .arg(config.as_os_str())
            .args(["detect", "--text", CONTACT])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }
}

/// Tests the redact subcommand on PDFs and text files.
mod redact {
    use super::*;

    #[test]
    fn test_redact_pdf() {
        let temp_dir = TempDir::new().unwrap();
        let input = statement_fixture()
            .write(&temp_dir.path().join("statement.pdf"))
            .unwrap();
        let output = temp_dir.path().join("out.pdf");

        docredact_cmd()
            .arg("redact")
            .arg("-i")
            .arg(input.as_os_str())
            .arg("-o")
            .arg(output.as_os_str())
            .assert()
            .success()
            .stdout(predicate::str::contains("Successfully redacted 3"));

        let bytes = fs::read(&output).unwrap();
        assert_redacted(&bytes, "jane@example.com");
        assert_redacted(&bytes, "4111111111111111");
        assert_preserved(&bytes, "Customer statement");
    }

    #[test]
    fn test_redact_pdf_verbose_summary() {
        let temp_dir = TempDir::new().unwrap();
        let input = statement_fixture()
            .write(&temp_dir.path().join("statement.pdf"))
            .unwrap();
        let output = temp_dir.path().join("out.pdf");

        docredact_cmd()
            .arg("redact")
            .arg("--input")
            .arg(input.as_os_str())
            .arg("--output")
            .arg(output.as_os_str())
            .args(["--action", "highlight", "--verbose"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Pages processed: 2"))
            .stdout(predicate::str::contains("EMAIL"));

        assert_preserved(&fs::read(&output).unwrap(), "jane@example.com");
    }

    #[test]
    fn test_redact_text_file() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("note.txt");
        let output = temp_dir.path().join("note.redacted.txt");
        fs::write(&input, CONTACT).unwrap();

        docredact_cmd()
            .arg("redact")
            .arg("-i")
            .arg(input.as_os_str())
            .arg("-o")
            .arg(output.as_os_str())
            .args(["--rules", "email,phone,credit_card"])
            .assert()
            .success();

        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "Contact [EMAIL] or call [PHONE], card [CREDIT_CARD]"
        );
    }

    #[test]
    fn test_nothing_found() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("plain.txt");
        let output = temp_dir.path().join("plain.out.txt");
        fs::write(&input, "nothing sensitive here").unwrap();

        docredact_cmd()
            .arg("redact")
            .arg("-i")
            .arg(input.as_os_str())
            .arg("-o")
            .arg(output.as_os_str())
            .assert()
            .success()
            .stdout(predicate::str::contains("No instances found"));
    }

    #[test]
    fn test_missing_input_file() {
        let temp_dir = TempDir::new().unwrap();
        docredact_cmd()
            .arg("redact")
            .arg("-i")
            .arg(temp_dir.path().join("missing.pdf").as_os_str())
            .arg("-o")
            .arg(temp_dir.path().join("out.pdf").as_os_str())
            .assert()
            .failure()
            .stderr(predicate::str::contains("does not exist"));
    }

    #[test]
    fn test_binary_input_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("blob.bin");
        let output = temp_dir.path().join("blob.out");
        fs::write(&input, [0xff, 0xfe, 0x00, 0x81]).unwrap();

        docredact_cmd()
            .arg("redact")
            .arg("-i")
            .arg(input.as_os_str())
            .arg("-o")
            .arg(output.as_os_str())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unsupported input format"));
        assert!(!output.exists());
    }

    #[test]
    fn test_ocr_mode_without_engine() {
        let temp_dir = TempDir::new().unwrap();
        let input = statement_fixture()
            .write(&temp_dir.path().join("statement.pdf"))
            .unwrap();

        docredact_cmd()
            .arg("redact")
            .arg("-i")
            .arg(input.as_os_str())
            .arg("-o")
            .arg(temp_dir.path().join("out.pdf").as_os_str())
            .args(["--mode", "ocr"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("OCR"));
    }
}

/// Tests extract, validate and rules.
mod inspection {
    use super::*;

    #[test]
    fn test_extract_positioned_text() {
        let temp_dir = TempDir::new().unwrap();
        let input = statement_fixture()
            .write(&temp_dir.path().join("statement.pdf"))
            .unwrap();

        docredact_cmd()
            .arg("extract")
            .arg("-i")
            .arg(input.as_os_str())
            .assert()
            .success()
            .stdout(predicate::str::contains("--- Page 1 ---"))
            .stdout(predicate::str::contains("Customer statement"))
            .stdout(predicate::str::contains("--- Page 2 ---"));
    }

    #[test]
    fn test_extract_to_file() {
        let temp_dir = TempDir::new().unwrap();
        let input = statement_fixture()
            .write(&temp_dir.path().join("statement.pdf"))
            .unwrap();
        let output = temp_dir.path().join("statement.txt");

        docredact_cmd()
            .arg("extract")
            .arg("-i")
            .arg(input.as_os_str())
            .arg("-o")
            .arg(output.as_os_str())
            .assert()
            .success()
            .stdout(predicate::str::contains("Extracted"));

        assert!(fs::read_to_string(&output)
            .unwrap()
            .contains("jane@example.com"));
    }

    #[test]
    fn test_validate_card() {
        docredact_cmd()
            .args(["validate", "--rule", "credit_card", "4111 1111 1111 1111"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"valid\":true"))
            .stdout(predicate::str::contains("4111111111111111"));
    }

    #[test]
    fn test_validate_bad_dni() {
        docredact_cmd()
            .args(["validate", "--rule", "DNI", "12345678A"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"valid\":false"));
    }

    #[test]
    fn test_rules_listing() {
        docredact_cmd()
            .arg("rules")
            .assert()
            .success()
            .stdout(predicate::str::contains("CREDIT_CARD"))
            .stdout(predicate::str::contains("HEALTH_DATA"))
            .stdout(predicate::str::contains("validated"));
    }
}
