use std::process::Command;

fn main() {
    // Prefer a commit provided by the deploy environment, then fall back to git
    let git_hash = std::env::var("GIT_COMMIT_SHA").unwrap_or_else(|_| {
        match Command::new("git").args(["rev-parse", "HEAD"]).output() {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            }
            _ => "unknown".to_string(),
        }
    });

    let short_hash = if git_hash != "unknown" && git_hash.len() >= 7 {
        git_hash[..7].to_string()
    } else {
        git_hash
    };

    println!("cargo:rustc-env=GIT_COMMIT_SHORT={}", short_hash);
    println!("cargo:rerun-if-env-changed=GIT_COMMIT_SHA");

    if std::path::Path::new(".git/HEAD").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
        println!("cargo:rerun-if-changed=.git/refs/heads");
    }
}
