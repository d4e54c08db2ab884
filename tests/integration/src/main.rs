//! Integration Test Harness
//!
//! Runs every integration test category and prints a summary.
//!
//! # Usage
//!
//! Run all tests:
//! ```text
//! cargo run -p integration-tests
//! ```
//!
//! Run one category:
//! ```text
//! cargo test -p integration-tests --test session_tests
//! cargo test -p integration-tests --test fragmentation_tests
//! ```
//!
//! Run with client tracing:
//! ```text
//! RUST_LOG=ndr_client=trace cargo run -p integration-tests
//! ```

use std::process::Command;
use std::time::{Duration, Instant};

/// Test category
#[derive(Debug, Clone)]
struct TestCategory {
    name: &'static str,
    description: &'static str,
    test_name: &'static str,
}

const TEST_CATEGORIES: &[TestCategory] = &[
    TestCategory {
        name: "Session Tests",
        description: "Bind negotiation, calls, faults and shared sessions",
        test_name: "session_tests",
    },
    TestCategory {
        name: "Fragmentation Tests",
        description: "Multi-fragment requests and responses, reassembly limits",
        test_name: "fragmentation_tests",
    },
];

fn print_banner() {
    println!("{}", "=".repeat(80));
    println!("ndr-client integration test suite");
    println!("{}", "=".repeat(80));
}

fn print_test_categories() {
    println!("Test Categories:");
    println!("{}", "-".repeat(80));
    for (i, cat) in TEST_CATEGORIES.iter().enumerate() {
        println!("  {}. {} - {}", i + 1, cat.name, cat.description);
    }
    println!("{}", "-".repeat(80));
    println!();
}

struct CategoryResult {
    name: &'static str,
    passed: bool,
    duration: Duration,
    details: String,
}

fn run_test_category(category: &TestCategory) -> CategoryResult {
    println!("\n{}", "=".repeat(80));
    println!("Running: {}", category.name);
    println!("{}", "=".repeat(80));

    let start = Instant::now();
    let output = Command::new("cargo")
        .args(["test", "-p", "integration-tests", "--test", category.test_name, "--", "--nocapture"])
        .output();
    let duration = start.elapsed();

    let (passed, details) = match output {
        Ok(output) => {
            print!("{}", String::from_utf8_lossy(&output.stdout));
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
            if output.status.success() {
                (true, "PASSED".to_string())
            } else {
                (false, format!("FAILED (exit code: {:?})", output.status.code()))
            }
        }
        Err(e) => (false, format!("Failed to execute: {}", e)),
    };

    CategoryResult {
        name: category.name,
        passed,
        duration,
        details,
    }
}

fn main() {
    print_banner();
    print_test_categories();

    let total_start = Instant::now();
    let results: Vec<CategoryResult> = TEST_CATEGORIES.iter().map(run_test_category).collect();
    let failed = results.iter().filter(|r| !r.passed).count();

    println!("\n{}", "=".repeat(80));
    println!("SUMMARY");
    println!("{}", "=".repeat(80));
    println!(
        "Categories: {} | Passed: {} | Failed: {} | Total: {:?}",
        results.len(),
        results.len() - failed,
        failed,
        total_start.elapsed()
    );
    println!();
    println!("{:<30} {:<10} {:<15} {}", "Category", "Status", "Duration", "Details");
    println!("{}", "-".repeat(80));
    for r in &results {
        let status = if r.passed { "PASS" } else { "FAIL" };
        println!("{:<30} {:<10} {:<15?} {}", r.name, status, r.duration, r.details);
    }

    std::process::exit(if failed > 0 { 1 } else { 0 });
}
