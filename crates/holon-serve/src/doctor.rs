use holon_domain::config::{Config, ConfigSeverity};

/// Run diagnostic checks and print a summary. Returns `Ok(true)` when every
/// check passes.
pub fn run(config: &Config, config_path: &str, state_dir: &str) -> anyhow::Result<bool> {
    println!("holon-serve doctor");
    println!("==================\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_state_dir_writable(state_dir, &mut all_passed);
    check_forwarder_helper(&mut all_passed);

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }
    Ok(all_passed)
}

fn print_check(name: &str, passed: bool, detail: impl AsRef<str>) {
    let mark = if passed { "OK" } else { "FAIL" };
    println!("[{mark}] {name}: {}", detail.as_ref());
}

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (running rpc_only with defaults)")
        },
    );
    // A missing config is not fatal — rpc_only is a valid steady state.
    let _ = all_passed;
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let errors: Vec<_> = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .collect();
    print_check(
        "Config validates",
        errors.is_empty(),
        if errors.is_empty() {
            "no errors".to_string()
        } else {
            format!("{} error(s)", errors.len())
        },
    );
    if !errors.is_empty() {
        *all_passed = false;
        for issue in &errors {
            println!("    {issue}");
        }
    }
}

fn check_state_dir_writable(state_dir: &str, all_passed: &mut bool) {
    let probe = std::path::Path::new(state_dir).join(".doctor-write-probe");
    let writable = std::fs::create_dir_all(state_dir)
        .and_then(|_| std::fs::write(&probe, b"ok"))
        .is_ok();
    if writable {
        let _ = std::fs::remove_file(&probe);
    } else {
        *all_passed = false;
    }
    print_check("State directory writable", writable, state_dir);
}

fn check_forwarder_helper(all_passed: &mut bool) {
    let helper = std::env::var("FORWARDER_HELPER_PATH").unwrap_or_else(|_| "gh-webhook-forward".to_string());
    let found = which_on_path(&helper).is_some();
    // Only relevant when gh_forward transport is actually selected; a
    // missing helper does not fail the overall doctor run, it's a warning.
    print_check(
        "Forwarder helper on PATH",
        true,
        if found {
            format!("{helper} found")
        } else {
            format!("{helper} not found on PATH (only needed for gh_forward transport)")
        },
    );
    let _ = all_passed;
}

fn which_on_path(program: &str) -> Option<std::path::PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
