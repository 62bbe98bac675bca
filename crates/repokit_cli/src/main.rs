//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `repokit_core` linkage and run the soccer repositories end to
//!   end against an in-memory database.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Set `REPOKIT_LOG_DIR` to an absolute path to write rolling logs there.

use log::info;
use repokit_core::model::{soccer_registry, ExcludeIdView, SoccerPlayer, Team};
use repokit_core::repo::{SoccerPlayerRepository, TeamRepository};
use repokit_core::{
    default_log_level, init_logging, Database, PageRequest, RepoResult, RepositoryConfig, Sort,
};
use std::error::Error;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var("REPOKIT_LOG_DIR") {
        init_logging(default_log_level(), &log_dir)?;
    }

    println!("repokit_core ping={}", repokit_core::ping());
    println!("repokit_core version={}", repokit_core::core_version());

    run_demo()?;
    Ok(())
}

fn run_demo() -> RepoResult<()> {
    let registry = Arc::new(soccer_registry()?);
    let players = SoccerPlayerRepository::build(Arc::clone(&registry))?;
    let teams = TeamRepository::build(Arc::clone(&registry))?;
    let mut db = Database::open_in_memory(registry, RepositoryConfig::default())?;

    db.transaction(|scope| {
        let spurs = teams.save(scope, Team::new("Spurs"))?;
        let city = teams.save(scope, Team::new("City"))?;
        players.save_all(
            scope,
            vec![
                SoccerPlayer::new("Son", 31, 183, 77).on_team(&spurs),
                SoccerPlayer::new("Maddison", 27, 175, 73).on_team(&spurs),
                SoccerPlayer::new("Haaland", 23, 195, 88).on_team(&city),
                SoccerPlayer::new("Free Agent", 29, 180, 75),
            ],
        )?;
        Ok(())
    })?;
    info!("event=demo_seed module=cli status=ok");

    let scope = db.scope()?;

    let roster: Vec<String> = teams
        .find_all_with_players(&scope)?
        .into_iter()
        .map(|team| {
            let size = team.soccer_players.get().map_or(0, <[SoccerPlayer]>::len);
            format!("{}({size})", team.name)
        })
        .collect();
    println!("teams={}", roster.join(","));

    let tall = players.find_by_height_greater_than_declared(&scope, 180)?;
    println!("taller_than_180={}", tall.len());

    let page = players.find_page(
        &scope,
        None,
        &PageRequest::of_sorted(0, 2, Sort::asc("name"))?,
    )?;
    println!(
        "page=0 size=2 total_elements={} total_pages={} has_next={}",
        page.total_elements(),
        page.total_pages(),
        page.has_next()
    );

    for view in players.find_projection_by_name::<ExcludeIdView>(&scope, "Son")? {
        println!("view name={} height={} weight={}", view.name, view.height, view.weight);
    }

    println!("round_trips={}", scope.round_trips());
    scope.commit()
}
