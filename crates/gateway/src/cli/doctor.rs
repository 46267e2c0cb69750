use rl_domain::config::{Config, ConfigSeverity};

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("relayd doctor");
    println!("=============\n");

    let mut all_passed = true;

    // 1. Config file
    check_config_file(config_path, &mut all_passed);

    // 2. Config validation
    check_config_validation(config, &mut all_passed);

    // 3. Data directory (C1 Store Gateway)
    check_data_dir(config, &mut all_passed);

    // 4. Agent backend launcher (C2 Agent Transport)
    check_resolvable("Agent backend launcher", &config.agent_backend.command, &mut all_passed);

    // 5. Sandbox launcher (C3), optional
    check_sandbox_launcher(config, &mut all_passed);

    // 6. Auxiliary LLM provider (informational only)
    check_llm_provider(config);

    // 7. Listening port free
    check_port_free(config, &mut all_passed).await;

    // Summary
    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({} error(s))", issues.len(), error_count),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_data_dir(config: &Config, all_passed: &mut bool) {
    let path = std::path::Path::new(&config.data_dir);
    if let Err(e) = std::fs::create_dir_all(path) {
        print_check("Data directory", false, format!("{}: {e}", path.display()));
        *all_passed = false;
        return;
    }
    let probe = path.join(".relayd_doctor_probe");
    let writable = std::fs::write(&probe, b"probe").is_ok();
    let _ = std::fs::remove_file(&probe);

    print_check(
        "Data directory",
        writable,
        if writable {
            format!("{} (writable)", path.display())
        } else {
            format!("{} (not writable)", path.display())
        },
    );
    if !writable {
        *all_passed = false;
    }
}

/// Resolves `command` either as an absolute/relative path or by searching
/// `PATH`, the same resolution a shell does before `exec`.
fn resolve_on_path(command: &str) -> bool {
    if command.is_empty() {
        return false;
    }
    if command.contains(std::path::MAIN_SEPARATOR) {
        return std::path::Path::new(command).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(command).is_file())
        })
        .unwrap_or(false)
}

fn check_resolvable(name: &str, command: &str, all_passed: &mut bool) {
    if command.is_empty() {
        print_check(name, false, "not configured".into());
        *all_passed = false;
        return;
    }
    let ok = resolve_on_path(command);
    print_check(
        name,
        ok,
        if ok {
            command.to_owned()
        } else {
            format!("{command} (not found on PATH)")
        },
    );
    if !ok {
        *all_passed = false;
    }
}

fn check_sandbox_launcher(config: &Config, all_passed: &mut bool) {
    if config.sandbox.launcher_command.is_empty() {
        print_check("Sandbox launcher", true, "disabled (no launcher_command configured)".into());
        return;
    }
    check_resolvable("Sandbox launcher", &config.sandbox.launcher_command, all_passed);
}

fn check_llm_provider(config: &Config) {
    match &config.llm.provider {
        Some(p) => print_check("Auxiliary LLM provider", true, format!("{} ({:?})", p.id, p.kind)),
        None => print_check(
            "Auxiliary LLM provider",
            true,
            "none configured (appraisal/synthesis fall back to heuristics)".into(),
        ),
    }
}

async fn check_port_free(config: &Config, all_passed: &mut bool) {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let ok = tokio::net::TcpListener::bind(&addr).await.is_ok();
    print_check(
        "Listening port free",
        ok,
        if ok {
            addr
        } else {
            format!("{addr} (already in use)")
        },
    );
    if !ok {
        *all_passed = false;
    }
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
