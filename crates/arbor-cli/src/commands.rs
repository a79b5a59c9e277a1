use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use tracing::debug;

use arbor_dag::{HistoryInterval, Version};
use arbor_server::{
    CommitInfo, ModelService, RepositoriesManager, RepositoryConfig, ServerConfig, ServerResult,
};
use arbor_types::{BranchReference, IdGenerator, NodeId, RepositoryId, TimeRange, Timestamp};

use crate::cli::*;

const ROLE: &str = "children";
const USER: &str = "arbor";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    debug!(?config, "configuration");
    let format = cli.format;
    match cli.command {
        Command::Init(args) => cmd_init(config, format, args).await,
        Command::Simulate(args) => cmd_simulate(config, format, args).await,
        Command::History(args) => cmd_history(config, format, args).await,
    }
}

fn service(config: ServerConfig) -> ModelService {
    ModelService::open(Arc::new(RepositoriesManager::in_memory(config)))
}

async fn cmd_init(config: ServerConfig, format: OutputFormat, args: InitArgs) -> anyhow::Result<()> {
    let default_branch = config.default_branch.clone();
    let service = service(config);
    let repository = RepositoryId::new(args.repository)?;
    let branch = args.branch.clone().unwrap_or(default_branch);
    let version = service
        .create_repository(
            USER,
            repository.clone(),
            RepositoryConfig {
                initial_branch: args.branch,
                author: args.author,
                ..RepositoryConfig::default()
            },
        )
        .await?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "repository": repository.as_str(),
                "branch": branch,
                "version": version.hash(),
                "tree": version.tree_hash(),
                "id": version.id().as_u64(),
            })
        ),
        OutputFormat::Text => {
            println!("{} Initialized repository {}", "✓".green().bold(), repository.as_str().bold());
            println!("  Branch:  {}", branch.yellow());
            println!("  Version: {} ({})", version.hash().short_hex().cyan(), version.id());
            println!("  Tree:    {}", version.tree_hash().short_hex().dimmed());
        }
    }
    Ok(())
}

async fn cmd_simulate(config: ServerConfig, format: OutputFormat, args: SimulateArgs) -> anyhow::Result<()> {
    let service = service(config);
    let repository = RepositoryId::new(args.repository)?;
    let initial = service
        .create_repository(USER, repository.clone(), RepositoryConfig::default())
        .await?;
    let branch = BranchReference::new(
        repository.clone(),
        service.manager().config().default_branch.clone(),
    );

    let writers: Vec<_> = (1..=args.writers)
        .map(|client| {
            let (service, branch, initial) = (service.clone(), branch.clone(), initial.clone());
            tokio::spawn(write_children(service, branch, initial, client, args.children))
        })
        .collect();
    for writer in writers {
        writer.await??;
    }

    let head = service
        .head(USER, branch.clone())
        .await?
        .context("branch disappeared during the simulation")?;
    let tree = service.manager().graph(&repository).tree(&head);
    let children = tree.children(NodeId::ROOT, ROLE)?.len();
    let expected = args.writers as usize * args.children;

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "head": head.hash(), "children": children, "expected": expected })
        ),
        OutputFormat::Text => {
            let status = if children == expected { "✓".green().bold() } else { "✗".red().bold() };
            println!("{status} {} writers pushed to {}", args.writers, branch.to_string().yellow());
            println!("  Head:     {}", head.hash().short_hex().cyan());
            println!("  Children: {children} of {expected}");
        }
    }
    Ok(())
}

/// One client: add `count` children, pushing after each against the head it
/// last saw.
async fn write_children(
    service: ModelService,
    branch: BranchReference,
    mut head: Version,
    client: u32,
    count: usize,
) -> anyhow::Result<()> {
    let ids = Arc::new(IdGenerator::new(client)?);
    let author = format!("writer-{client}");
    for _ in 0..count {
        let (manager, ids, base) = (Arc::clone(service.manager()), Arc::clone(&ids), head.clone());
        let (repository, info) = (branch.repository.clone(), CommitInfo::now(Some(author.clone())));
        let version = tokio::task::spawn_blocking(move || -> ServerResult<Version> {
            let child = ids.next_node_id()?;
            manager.create_version(&repository, &base, &ids, info, |t| {
                t.add_child_last(NodeId::ROOT, ROLE, child, None)
            })
        })
        .await??;
        head = service
            .push(&author, branch.clone(), version.hash(), Some(head.hash()))
            .await?;
    }
    Ok(())
}

async fn cmd_history(config: ServerConfig, format: OutputFormat, args: HistoryArgs) -> anyhow::Result<()> {
    let service = service(config);
    let repository = RepositoryId::new("history")?;
    let start = Timestamp::from_secs(1_700_000_000);
    let mut head = service
        .create_repository(
            USER,
            repository.clone(),
            RepositoryConfig {
                created_at: Some(start),
                ..RepositoryConfig::default()
            },
        )
        .await?;
    let branch = BranchReference::new(
        repository.clone(),
        service.manager().config().default_branch.clone(),
    );

    let ids = IdGenerator::new(1)?;
    for i in 0..args.pushes {
        let user = if i % 2 == 0 { "user1" } else { "user2" };
        let time = push_time(start, args.step, i)?;
        let child = ids.next_node_id()?;
        let version = service.manager().create_version(
            &repository,
            &head,
            &ids,
            CommitInfo::at(Some(user.into()), time),
            |t| t.add_child_last(NodeId::ROOT, ROLE, child, None),
        )?;
        head = service
            .push(user, branch.clone(), version.hash(), Some(head.hash()))
            .await?;
    }

    let intervals = service
        .history_intervals(USER, branch.clone(), TimeRange::unbounded(), args.interval, 0, args.limit)
        .await?;
    let sessions = service
        .history_sessions(USER, branch, TimeRange::unbounded(), args.idle_gap, 0, args.limit)
        .await?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "intervals": intervals, "sessions": sessions }))?
        ),
        OutputFormat::Text => {
            println!("{} ({}s buckets)", "Intervals".bold(), args.interval);
            print_groups(&intervals);
            println!();
            println!("{} (idle gap {}s)", "Sessions".bold(), args.idle_gap);
            print_groups(&sessions);
        }
    }
    Ok(())
}

/// Time of the `index`-th generated push, `step` seconds apart.
fn push_time(start: Timestamp, step: i64, index: usize) -> anyhow::Result<Timestamp> {
    let offset = i64::try_from(index)
        .ok()
        .and_then(|i| i.checked_add(1))
        .and_then(|n| step.checked_mul(n))
        .with_context(|| format!("push {index} at a {step}s step overflows the time line"))?;
    Ok(start.saturating_add_secs(offset))
}

fn print_groups(groups: &[HistoryInterval]) {
    if groups.is_empty() {
        println!("  (none)");
    }
    for group in groups {
        let authors: Vec<&str> = group.authors.iter().map(String::as_str).collect();
        println!(
            "  {} .. {}  {:>4} versions  {}",
            group.min_time.to_string().dimmed(),
            group.max_time.to_string().dimmed(),
            group.size,
            authors.join(", ").yellow(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_times_are_spaced_by_step() {
        let start = Timestamp::from_secs(1_000);
        assert_eq!(push_time(start, 13, 0).unwrap(), Timestamp::from_secs(1_013));
        assert_eq!(push_time(start, 13, 9).unwrap(), Timestamp::from_secs(1_130));
    }

    #[test]
    fn overflowing_step_is_an_error() {
        let start = Timestamp::from_secs(0);
        let err = push_time(start, i64::MAX / 2, 2).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");
        assert!(push_time(start, i64::MIN, 1).is_err());
    }
}
