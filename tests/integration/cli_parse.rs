use clap::{CommandFactory, Parser};
use dropsite::tooling::cli::{Cli, Commands};

#[test]
fn parse_valid_command_matrix() {
    let cases: Vec<Vec<&str>> = vec![
        vec!["dropsite", "sync"],
        vec!["dropsite", "sync", "--force"],
        vec!["dropsite", "sync", "--path", "/docs/guide.md"],
        vec!["dropsite", "verify"],
        vec!["dropsite", "tree"],
        vec!["dropsite", "resources"],
        vec!["dropsite", "resources", "--format", "json"],
        vec!["dropsite", "orphans"],
        vec!["dropsite", "show", "/docs/guide"],
        vec!["dropsite", "attrs", "/docs/"],
        vec!["dropsite", "config"],
        vec!["dropsite", "flush"],
        vec!["dropsite", "--workspace", "/tmp/site", "--remote", "/srv/drop", "tree"],
        vec!["dropsite", "--log-level", "debug", "--log-format", "json", "verify"],
    ];

    for args in cases {
        let parsed = Cli::try_parse_from(args.clone());
        assert!(parsed.is_ok(), "expected valid parse for args: {args:?}");
    }
}

#[test]
fn parse_rejects_invalid_invocations() {
    assert!(Cli::try_parse_from(["dropsite"]).is_err());
    assert!(Cli::try_parse_from(["dropsite", "show"]).is_err());
    assert!(Cli::try_parse_from(["dropsite", "attrs"]).is_err());
    assert!(Cli::try_parse_from(["dropsite", "publish"]).is_err());
    assert!(Cli::try_parse_from(["dropsite", "sync", "--path"]).is_err());
}

#[test]
fn parse_sync_arguments() {
    let cli = Cli::try_parse_from(["dropsite", "sync", "--path", "/a.txt", "--force"]).unwrap();
    assert_eq!(
        cli.command,
        Commands::Sync {
            path: Some("/a.txt".to_string()),
            force: true
        }
    );
    assert_eq!(cli.workspace, std::path::PathBuf::from("."));
}

#[test]
fn help_lists_every_command() {
    let help = Cli::command().render_long_help().to_string();
    for name in ["sync", "verify", "tree", "resources", "orphans", "show", "attrs", "config", "flush"] {
        assert!(help.contains(name), "help is missing {name}");
    }
}
