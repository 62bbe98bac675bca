use repokit_core::model::{soccer_registry, SoccerPlayer, Team};
use repokit_core::repo::{SoccerPlayerRepository, TeamRepository};
use repokit_core::{
    Database, FixedAuditor, ManualClock, RepoError, RepositoryConfig, ScopeContext,
};
use std::sync::Arc;

struct Fixture {
    db: Database,
    players: SoccerPlayerRepository,
    teams: TeamRepository,
}

fn fixture() -> Fixture {
    let registry = Arc::new(soccer_registry().unwrap());
    Fixture {
        players: SoccerPlayerRepository::build(Arc::clone(&registry)).unwrap(),
        teams: TeamRepository::build(Arc::clone(&registry)).unwrap(),
        db: Database::open_in_memory(registry, RepositoryConfig::default()).unwrap(),
    }
}

/// Teams `A` (two players), `B` (one player) and `C` (empty roster).
fn seed_league(fixture: &mut Fixture) {
    let (players, teams) = (&fixture.players, &fixture.teams);
    fixture
        .db
        .transaction(|scope| {
            let a = teams.save(scope, Team::new("A"))?;
            let b = teams.save(scope, Team::new("B"))?;
            teams.save(scope, Team::new("C"))?;
            players.save_all(
                scope,
                vec![
                    SoccerPlayer::new("a1", 20, 180, 70).on_team(&a),
                    SoccerPlayer::new("a2", 21, 181, 71).on_team(&a),
                    SoccerPlayer::new("b1", 22, 182, 72).on_team(&b),
                ],
            )
        })
        .unwrap();
}

#[test]
fn fetched_team_needs_no_extra_round_trip() {
    let mut fixture = fixture();
    seed_league(&mut fixture);

    let scope = fixture.db.scope().unwrap();
    let before = scope.round_trips();
    let players = fixture.players.find_all_with_team(&scope).unwrap();
    assert_eq!(scope.round_trips(), before + 1);

    for player in &players {
        let team = player.team.get().unwrap().expect("team fetched");
        assert_eq!(team.name.to_lowercase(), &player.name[..1]);
    }
    assert_eq!(scope.round_trips(), before + 1);

    let declared = fixture.players.find_all_with_team_declared(&scope).unwrap();
    assert!(declared.iter().all(|player| player.team.is_loaded()));

    let by_name = fixture.players.find_all_by_name_with_team(&scope, "b1").unwrap();
    assert_eq!(by_name[0].team.get().unwrap().map(|team| team.name.as_str()), Some("B"));
}

#[test]
fn rosters_load_in_one_batched_round_trip() {
    let mut fixture = fixture();
    seed_league(&mut fixture);

    let scope = fixture.db.scope().unwrap();
    let before = scope.round_trips();
    let teams = fixture.teams.find_all_with_players(&scope).unwrap();
    assert_eq!(scope.round_trips(), before + 1);

    let sizes: Vec<_> = teams
        .iter()
        .map(|team| (team.name.as_str(), team.soccer_players.get().unwrap().len()))
        .collect();
    assert_eq!(sizes, vec![("A", 2), ("B", 1), ("C", 0)]);
}

#[test]
fn deferred_association_resolves_only_through_its_scope() {
    let mut fixture = fixture();
    seed_league(&mut fixture);

    let player = {
        let scope = fixture.db.scope().unwrap();
        let player = fixture
            .players
            .find_by_name_declared(&scope, "a1")
            .unwrap()
            .remove(0);

        assert!(matches!(
            player.team.get(),
            Err(RepoError::DeferredAssociation { .. })
        ));

        let before = scope.round_trips();
        let team = scope.resolve(&player.team).unwrap().expect("team");
        assert_eq!(team.name, "A");
        assert_eq!(scope.round_trips(), before + 1);

        let roster = scope.resolve_many(&team.soccer_players).unwrap();
        assert_eq!(roster.len(), 2);

        scope.commit().unwrap();
        player
    };

    assert!(matches!(
        player.team.get(),
        Err(RepoError::DetachedAccess { .. })
    ));

    let scope = fixture.db.scope().unwrap();
    let err = scope.resolve(&player.team).unwrap_err();
    assert!(matches!(err, RepoError::DetachedAccess { .. }));
}

#[test]
fn cached_player_sees_a_later_save_of_its_fetched_team() {
    let mut fixture = fixture();
    seed_league(&mut fixture);

    let scope = fixture.db.scope().unwrap();
    let fetched = fixture.players.find_all_with_team(&scope).unwrap();
    let a1 = fetched.iter().find(|player| player.name == "a1").unwrap();
    let player_id = a1.id.unwrap();
    let mut team = a1.team.get().unwrap().expect("team fetched").clone();
    assert!(scope.is_cached("Team", &team.id.unwrap().into()));

    team.name = "Renamed".to_string();
    fixture.teams.save(&scope, team).unwrap();

    let before = scope.round_trips();
    let again = fixture.players.get_by_id(&scope, player_id).unwrap();
    let resolved = scope.resolve(&again.team).unwrap().expect("team");
    assert_eq!(resolved.name, "Renamed");
    assert_eq!(scope.round_trips(), before);
}

#[test]
fn repeated_lookup_in_one_scope_hits_the_cache() {
    let mut fixture = fixture();
    seed_league(&mut fixture);

    let scope = fixture.db.scope().unwrap();
    let team = fixture.teams.find_one_by_name(&scope, "A").unwrap().unwrap();
    let id = team.id.unwrap();
    assert!(scope.is_cached("Team", &id.into()));

    let before = scope.round_trips();
    let again = fixture.teams.get_by_id(&scope, id).unwrap();
    assert_eq!(again.name, "A");
    assert_eq!(scope.round_trips(), before);
}

#[test]
fn audit_columns_follow_the_configured_clock_and_auditor() {
    let registry = Arc::new(soccer_registry().unwrap());
    let players = SoccerPlayerRepository::build(Arc::clone(&registry)).unwrap();
    let clock = Arc::new(ManualClock::starting_at(1_000));
    let context = ScopeContext::new(
        Arc::new(FixedAuditor(Some("alice".to_string()))),
        clock.clone(),
    )
    .with_modify_on_create(false);
    let mut db = Database::open_in_memory(registry, RepositoryConfig::default())
        .unwrap()
        .with_context(context);

    let id = db
        .transaction(|scope| players.save(scope, SoccerPlayer::new("Kim", 20, 180, 70)))
        .unwrap()
        .id
        .unwrap();

    {
        let scope = db.scope().unwrap();
        let created = players.get_by_id(&scope, id).unwrap();
        let audit = created.meta.audit();
        assert_eq!(audit.created_at(), Some(1_000));
        assert_eq!(audit.created_by(), Some("alice"));
        assert_eq!(audit.updated_at(), None);
        assert_eq!(audit.updated_by(), None);
        scope.commit().unwrap();
    }

    clock.set(5_000);
    db.transaction(|scope| {
        let mut player = players.get_by_id(scope, id)?;
        player.weight = 72;
        players.save(scope, player)
    })
    .unwrap();

    let scope = db.scope().unwrap();
    let updated = players.get_by_id(&scope, id).unwrap();
    let audit = updated.meta.audit();
    assert_eq!(audit.created_at(), Some(1_000));
    assert_eq!(audit.updated_at(), Some(5_000));
    assert_eq!(audit.updated_by(), Some("alice"));
}

#[test]
fn bulk_update_leaves_audit_columns_untouched() {
    let registry = Arc::new(soccer_registry().unwrap());
    let players = SoccerPlayerRepository::build(Arc::clone(&registry)).unwrap();
    let clock = Arc::new(ManualClock::starting_at(1_000));
    let context = ScopeContext::new(Arc::new(FixedAuditor(None)), clock.clone());
    let mut db = Database::open_in_memory(registry, RepositoryConfig::default())
        .unwrap()
        .with_context(context);

    let id = db
        .transaction(|scope| players.save(scope, SoccerPlayer::new("Kim", 20, 190, 70)))
        .unwrap()
        .id
        .unwrap();

    clock.set(9_000);
    let scope = db.scope().unwrap();
    assert_eq!(players.bulk_add_weight(&scope, 180, 3).unwrap(), 1);
    let player = players.get_by_id(&scope, id).unwrap();
    assert_eq!(player.weight, 73);
    assert_eq!(player.meta.audit().updated_at(), Some(1_000));
}

#[test]
fn read_only_hint_suppresses_write_back() {
    let mut fixture = fixture();
    seed_league(&mut fixture);

    {
        let scope = fixture.db.scope().unwrap();
        let mut player = fixture
            .players
            .find_read_only_by_name(&scope, "b1")
            .unwrap()
            .unwrap();
        assert!(player.meta.is_read_only());
        assert!(!scope.is_cached("SoccerPlayer", &player.id.into()));

        player.weight = 999;
        fixture.players.save(&scope, player).unwrap();
        scope.commit().unwrap();
    }

    let scope = fixture.db.scope().unwrap();
    let reloaded = fixture.players.find_one_by_name(&scope, "b1").unwrap().unwrap();
    assert_eq!(reloaded.weight, 72);
}

#[test]
fn stale_team_save_surfaces_conflict_at_commit() {
    let mut fixture = fixture();
    let teams = &fixture.teams;
    let saved = fixture
        .db
        .transaction(|scope| teams.save(scope, Team::new("Original")))
        .unwrap();
    assert_eq!(saved.meta.version(), Some(0));
    let id = saved.id.unwrap();

    let mut stale = {
        let scope = fixture.db.scope().unwrap();
        let team = fixture.teams.get_by_id(&scope, id).unwrap();
        scope.commit().unwrap();
        team
    };

    let renamed = fixture
        .db
        .transaction(|scope| {
            let mut team = teams.get_by_id(scope, id)?;
            team.name = "Renamed".to_string();
            teams.save(scope, team)
        })
        .unwrap();
    assert_eq!(renamed.meta.version(), Some(1));

    {
        let scope = fixture.db.scope().unwrap();
        stale.name = "Lost update".to_string();
        fixture.teams.save(&scope, stale).unwrap();
        let err = scope.commit().unwrap_err();
        assert!(matches!(err, RepoError::OptimisticConflict { .. }));
    }

    let scope = fixture.db.scope().unwrap();
    let current = fixture.teams.get_by_id(&scope, id).unwrap();
    assert_eq!(current.name, "Renamed");
    assert_eq!(current.meta.version(), Some(1));
}
