use std::fs;
use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/server/client.html");

    if Path::new(".git").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");

        // HEAD is usually a symbolic ref; watch the branch file for commits
        if let Ok(head) = fs::read_to_string(".git/HEAD") {
            if let Some(reference) = head.strip_prefix("ref: ") {
                let ref_path = format!(".git/{}", reference.trim());
                if Path::new(&ref_path).exists() {
                    println!("cargo:rerun-if-changed={}", ref_path);
                }
            }
        }
    }

    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
}
