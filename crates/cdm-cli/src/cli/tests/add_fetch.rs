//! Tests for add and fetch subcommands.

use super::{parse, parse_err};
use crate::cli::CliCommand;
use cdm_core::{GroupId, ItemId};

const GROUP: &str = "6f1c2d3e-4a5b-4c6d-8e7f-9a0b1c2d3e4f";
const ITEM_A: &str = "0e6b3f44-2a51-4b8e-9a0d-5c1f7e2d8b93";
const ITEM_B: &str = "b7c9d1e2-f3a4-45b6-8c7d-e8f9a0b1c2d3";

#[test]
fn cli_parse_add_minimal() {
    match parse(&[
        "cdm",
        "add",
        "https://cdn.example.com/intro.mp4",
        "--title",
        "Week 1 Intro",
    ]) {
        CliCommand::Add {
            url,
            title,
            group,
            ext,
        } => {
            assert_eq!(url, "https://cdn.example.com/intro.mp4");
            assert_eq!(title, "Week 1 Intro");
            assert!(group.is_none());
            assert!(ext.is_none());
        }
        _ => panic!("expected Add"),
    }
}

#[test]
fn cli_parse_add_with_group_and_ext() {
    match parse(&[
        "cdm",
        "add",
        "https://cdn.example.com/notes",
        "--title",
        "Notes",
        "--group",
        GROUP,
        "--ext",
        "pdf",
    ]) {
        CliCommand::Add { group, ext, .. } => {
            assert_eq!(group, Some(GROUP.parse::<GroupId>().unwrap()));
            assert_eq!(ext.as_deref(), Some("pdf"));
        }
        _ => panic!("expected Add with --group and --ext"),
    }
}

#[test]
fn cli_parse_add_requires_title() {
    parse_err(&["cdm", "add", "https://cdn.example.com/a.mp4"]);
}

#[test]
fn cli_parse_add_rejects_bad_group() {
    parse_err(&[
        "cdm",
        "add",
        "https://cdn.example.com/a.mp4",
        "--title",
        "A",
        "--group",
        "not-a-uuid",
    ]);
}

#[test]
fn cli_parse_fetch_items() {
    match parse(&["cdm", "fetch", ITEM_A, ITEM_B]) {
        CliCommand::Fetch { items, group } => {
            assert_eq!(
                items,
                vec![
                    ITEM_A.parse::<ItemId>().unwrap(),
                    ITEM_B.parse::<ItemId>().unwrap()
                ]
            );
            assert!(group.is_none());
        }
        _ => panic!("expected Fetch"),
    }
}

#[test]
fn cli_parse_fetch_group() {
    match parse(&["cdm", "fetch", "--group", GROUP]) {
        CliCommand::Fetch { items, group } => {
            assert!(items.is_empty());
            assert_eq!(group, Some(GROUP.parse::<GroupId>().unwrap()));
        }
        _ => panic!("expected Fetch --group"),
    }
}

#[test]
fn cli_parse_fetch_needs_items_or_group() {
    parse_err(&["cdm", "fetch"]);
}

#[test]
fn cli_parse_fetch_items_and_group_conflict() {
    parse_err(&["cdm", "fetch", ITEM_A, "--group", GROUP]);
}
