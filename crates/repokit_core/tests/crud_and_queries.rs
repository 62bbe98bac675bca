use repokit_core::model::{soccer_registry, specs, Director, SoccerPlayer, Team};
use repokit_core::repo::{
    DirectorRepository, SoccerPlayerCustom, SoccerPlayerRepository, TeamRepository,
};
use repokit_core::{
    and, Database, Example, Operand, Params, RepoError, RepositoryConfig, Sort,
};
use std::sync::Arc;

struct Fixture {
    db: Database,
    players: SoccerPlayerRepository,
    teams: TeamRepository,
}

fn fixture() -> Fixture {
    let registry = Arc::new(soccer_registry().unwrap());
    let players = SoccerPlayerRepository::build(Arc::clone(&registry)).unwrap();
    let teams = TeamRepository::build(Arc::clone(&registry)).unwrap();
    let db = Database::open_in_memory(registry, RepositoryConfig::default()).unwrap();
    Fixture { db, players, teams }
}

fn seed_players(fixture: &mut Fixture, players: Vec<SoccerPlayer>) -> Vec<SoccerPlayer> {
    let repo = &fixture.players;
    fixture
        .db
        .transaction(|scope| repo.save_all(scope, players))
        .unwrap()
}

fn names(players: &[SoccerPlayer]) -> Vec<&str> {
    players.iter().map(|player| player.name.as_str()).collect()
}

#[test]
fn saved_player_round_trips_through_find_by_id() {
    let mut fixture = fixture();
    let saved = seed_players(&mut fixture, vec![SoccerPlayer::new("Kim", 27, 181, 75)]);
    let id = saved[0].id.expect("generated id");

    let scope = fixture.db.scope().unwrap();
    let loaded = fixture.players.get_by_id(&scope, id).unwrap();
    assert_eq!(loaded.id, Some(id));
    assert_eq!(loaded.name, "Kim");
    assert_eq!((loaded.age, loaded.height, loaded.weight), (27, 181, 75));
    assert_eq!(loaded.meta.audit().created_at(), saved[0].meta.audit().created_at());
    assert!(loaded.team.get().unwrap().is_none());

    assert!(fixture.players.exists_by_id(&scope, id).unwrap());
    assert!(!fixture.players.exists_by_id(&scope, id + 100).unwrap());
    assert!(fixture.players.find_by_id(&scope, id + 100).unwrap().is_none());
    assert_eq!(fixture.players.count(&scope).unwrap(), 1);
}

#[test]
fn save_of_loaded_player_updates_in_place() {
    let mut fixture = fixture();
    let saved = seed_players(&mut fixture, vec![SoccerPlayer::new("Lee", 22, 175, 70)]);
    let id = saved[0].id.unwrap();

    {
        let scope = fixture.db.scope().unwrap();
        let mut player = fixture.players.get_by_id(&scope, id).unwrap();
        player.weight = 72;
        let updated = fixture.players.save(&scope, player).unwrap();
        assert_eq!(updated.id, Some(id));
        scope.commit().unwrap();
    }

    let scope = fixture.db.scope().unwrap();
    assert_eq!(fixture.players.get_by_id(&scope, id).unwrap().weight, 72);
    assert_eq!(fixture.players.count(&scope).unwrap(), 1);
}

#[test]
fn delete_variants_follow_identity_rules() {
    let mut fixture = fixture();
    let saved = seed_players(
        &mut fixture,
        vec![
            SoccerPlayer::new("A", 20, 170, 70),
            SoccerPlayer::new("B", 21, 171, 71),
        ],
    );

    let scope = fixture.db.scope().unwrap();
    fixture
        .players
        .delete(&scope, &SoccerPlayer::new("never saved", 1, 1, 1))
        .unwrap();
    fixture.players.delete(&scope, &saved[0]).unwrap();
    assert_eq!(fixture.players.count(&scope).unwrap(), 1);

    let missing = fixture.players.delete_by_id(&scope, 9_999).unwrap_err();
    assert!(matches!(missing, RepoError::NotFound { .. }));

    fixture
        .players
        .delete_by_id(&scope, saved[1].id.unwrap())
        .unwrap();
    assert_eq!(fixture.players.count(&scope).unwrap(), 0);
}

#[test]
fn derived_lookups_combine_their_clauses() {
    let mut fixture = fixture();
    seed_players(
        &mut fixture,
        vec![
            SoccerPlayer::new("Kim", 20, 190, 90),
            SoccerPlayer::new("Kim", 21, 185, 70),
            SoccerPlayer::new("Kim", 22, 170, 65),
            SoccerPlayer::new("Park", 23, 195, 80),
        ],
    );

    let scope = fixture.db.scope().unwrap();
    let taller = fixture
        .players
        .find_by_name_and_height_greater_than(&scope, "Kim", 180)
        .unwrap();
    assert_eq!(taller.len(), 2);
    assert!(taller.iter().all(|player| player.name == "Kim" && player.height > 180));

    let lighter = fixture
        .players
        .find_by_name_and_height_greater_than_and_weight_less_than(&scope, "Kim", 180, 80)
        .unwrap();
    assert_eq!(lighter.len(), 1);
    assert_eq!(lighter[0].height, 185);

    let none = fixture
        .players
        .find_by_name_and_height_greater_than(&scope, "Nobody", 0)
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn unknown_derived_attribute_is_unresolvable() {
    let fixture = fixture();
    let err = fixture
        .players
        .derived_plan("findByShoeSize", &[42_i64.into()])
        .unwrap_err();
    assert!(matches!(err, RepoError::UnresolvableIntent(_)));
}

#[test]
fn count_and_exists_patterns_run_only_as_what_they_derive() {
    let mut fixture = fixture();
    seed_players(
        &mut fixture,
        vec![
            SoccerPlayer::new("Kim", 27, 181, 75),
            SoccerPlayer::new("Kim", 22, 179, 71),
            SoccerPlayer::new("Lee", 24, 176, 70),
        ],
    );

    let scope = fixture.db.scope().unwrap();
    let players = &fixture.players;
    assert_eq!(players.count_by_name(&scope, "Kim").unwrap(), 2);
    assert!(players.exists_by_name(&scope, "Lee").unwrap());
    assert!(!players.exists_by_name(&scope, "Park").unwrap());

    let count = players
        .derived_plan("countByName", &[Operand::from("Kim")])
        .unwrap();
    let err = players.list(&scope, &count).unwrap_err();
    assert!(matches!(err, RepoError::UnresolvableIntent(_)));
    let err = players.exists_plan(&scope, &count).unwrap_err();
    assert!(matches!(err, RepoError::UnresolvableIntent(_)));

    let list = players
        .derived_plan("findAllByName", &[Operand::from("Kim")])
        .unwrap();
    assert_eq!(players.count_plan(&scope, &list).unwrap(), 2);
}

#[test]
fn declared_positional_and_named_queries_agree() {
    let mut fixture = fixture();
    let saved = seed_players(
        &mut fixture,
        vec![
            SoccerPlayer::new("Son", 30, 183, 77),
            SoccerPlayer::new("Son", 19, 170, 60),
            SoccerPlayer::new("Cho", 25, 188, 80),
        ],
    );

    let scope = fixture.db.scope().unwrap();
    let positional = fixture
        .players
        .find_by_name_and_height_positional(&scope, "Son", 175)
        .unwrap();
    let named = fixture
        .players
        .find_by_name_and_height_named(&scope, "Son", 175)
        .unwrap();
    assert_eq!(positional.len(), 1);
    assert_eq!(positional[0].id, named[0].id);

    let by_name = fixture.players.find_by_name_declared(&scope, "Son").unwrap();
    assert_eq!(by_name.len(), 2);

    let tall = fixture
        .players
        .find_by_height_greater_than_declared(&scope, 180)
        .unwrap();
    assert_eq!(tall.len(), 2);

    assert_eq!(fixture.players.find_all_declared(&scope).unwrap().len(), 3);

    let ids = [saved[0].id.unwrap(), saved[2].id.unwrap()];
    let mut picked = fixture.players.find_by_id_in(&scope, &ids).unwrap();
    picked.sort_by_key(|player| player.id);
    assert_eq!(names(&picked), vec!["Son", "Cho"]);
}

#[test]
fn custom_fragment_shares_the_scope_cache() {
    let mut fixture = fixture();
    seed_players(
        &mut fixture,
        vec![
            SoccerPlayer::new("Kim", 27, 181, 75),
            SoccerPlayer::new("Lee", 24, 176, 70),
        ],
    );

    let scope = fixture.db.scope().unwrap();
    let found = fixture.players.find_custom_by_name(&scope, "Kim").unwrap();
    assert_eq!(names(&found), vec!["Kim"]);
    let id = found[0].id.unwrap();
    assert!(scope.is_cached("SoccerPlayer", &id.into()));
    assert!(fixture.players.find_custom_by_name(&scope, "Park").unwrap().is_empty());

    let err = scope
        .create_query::<SoccerPlayer>(
            "SELECT sp FROM SoccerPlayer sp WHERE sp.shoeSize = :size",
            &Params::new().bind("size", 270),
        )
        .unwrap_err();
    assert!(matches!(err, RepoError::UnresolvableIntent(_)));
}

#[test]
fn declared_query_rejects_missing_parameter() {
    let fixture = fixture();
    let err = fixture
        .players
        .declared_plan("SoccerPlayer.findByName", &repokit_core::Params::new())
        .unwrap_err();
    assert!(matches!(err, RepoError::UnresolvableIntent(_)));

    let err = fixture
        .players
        .declared_plan("SoccerPlayer.nope", &repokit_core::Params::new())
        .unwrap_err();
    assert!(matches!(err, RepoError::UnresolvableIntent(_)));
}

#[test]
fn find_one_reports_non_unique_results() {
    let mut fixture = fixture();
    seed_players(
        &mut fixture,
        vec![
            SoccerPlayer::new("Twin", 20, 180, 70),
            SoccerPlayer::new("Twin", 20, 181, 71),
            SoccerPlayer::new("Solo", 20, 182, 72),
        ],
    );

    let scope = fixture.db.scope().unwrap();
    let err = fixture.players.find_one_by_name(&scope, "Twin").unwrap_err();
    assert!(matches!(err, RepoError::NonUniqueResult { matched: 2, .. }));

    let solo = fixture.players.find_one_by_name(&scope, "Solo").unwrap();
    assert_eq!(solo.map(|player| player.height), Some(182));
    assert!(fixture.players.find_one_by_name(&scope, "Ghost").unwrap().is_none());
}

#[test]
fn specification_filters_compose_with_absent_identity() {
    let mut fixture = fixture();
    let team = {
        let teams = &fixture.teams;
        fixture
            .db
            .transaction(|scope| teams.save(scope, Team::new("Dodgers")))
            .unwrap()
    };
    seed_players(
        &mut fixture,
        vec![
            SoccerPlayer::new("Ohtani", 29, 193, 95).on_team(&team),
            SoccerPlayer::new("Betts", 31, 175, 82).on_team(&team),
            SoccerPlayer::new("Free", 30, 190, 70),
        ],
    );

    let scope = fixture.db.scope().unwrap();
    let registry = fixture.players.registry();

    let everyone = fixture.players.find_matching(&scope, None).unwrap();
    assert_eq!(everyone.len(), fixture.players.find_all(&scope).unwrap().len());

    let blank_team = specs::team_name(registry, "  ").unwrap();
    assert!(blank_team.is_none());
    let tall = and(blank_team, specs::greater_height(registry, 185).unwrap());
    let mut tall_players = fixture.players.find_matching(&scope, tall).unwrap();
    tall_players.sort_by(|left, right| left.name.cmp(&right.name));
    assert_eq!(names(&tall_players), vec!["Free", "Ohtani"]);

    let dodgers_and_tall = and(
        specs::team_name(registry, "Dodgers").unwrap(),
        specs::greater_height(registry, 185).unwrap(),
    );
    let matched = fixture.players.find_matching(&scope, dodgers_and_tall).unwrap();
    assert_eq!(names(&matched), vec!["Ohtani"]);

    let heavy_or_short = specs::greater_weight(registry, 90)
        .unwrap()
        .or(repokit_core::Criteria::new(registry, "SoccerPlayer")
            .unwrap()
            .less_than("height", 180)
            .unwrap());
    assert_eq!(
        fixture.players.count_matching(&scope, Some(heavy_or_short)).unwrap(),
        2
    );
}

#[test]
fn sorted_listing_orders_by_requested_path() {
    let mut fixture = fixture();
    seed_players(
        &mut fixture,
        vec![
            SoccerPlayer::new("b", 20, 180, 70),
            SoccerPlayer::new("c", 20, 170, 70),
            SoccerPlayer::new("a", 20, 190, 70),
        ],
    );

    let scope = fixture.db.scope().unwrap();
    let by_name = fixture.players.find_all_sorted(&scope, Sort::asc("name")).unwrap();
    assert_eq!(names(&by_name), vec!["a", "b", "c"]);

    let by_height = fixture
        .players
        .find_all_sorted(&scope, Sort::desc("height"))
        .unwrap();
    assert_eq!(names(&by_height), vec!["a", "b", "c"]);
}

#[test]
fn query_by_example_skips_defaults_and_ignored_paths() {
    let mut fixture = fixture();
    seed_players(
        &mut fixture,
        vec![
            SoccerPlayer::new("Kim", 20, 180, 70),
            SoccerPlayer::new("Kim", 25, 190, 80),
            SoccerPlayer::new("Lee", 30, 180, 75),
        ],
    );

    let scope = fixture.db.scope().unwrap();
    let by_name = Example::of(SoccerPlayer::new("Kim", 0, 0, 0));
    let plan = fixture.players.example_plan(&by_name).unwrap();
    assert_eq!(fixture.players.list(&scope, &plan).unwrap().len(), 2);

    let by_height = Example::of(SoccerPlayer::new("ignored", 0, 180, 0)).ignoring(["name"]);
    let plan = fixture.players.example_plan(&by_height).unwrap();
    let mut matched = fixture.players.list(&scope, &plan).unwrap();
    matched.sort_by(|left, right| left.name.cmp(&right.name));
    assert_eq!(names(&matched), vec!["Kim", "Lee"]);
}

#[test]
fn transient_team_reference_is_rejected() {
    let mut fixture = fixture();
    let scope = fixture.db.scope().unwrap();
    let player = SoccerPlayer::new("Orphan", 20, 180, 70).on_team(&Team::new("Unsaved"));

    let err = fixture.players.save(&scope, player).unwrap_err();
    assert!(matches!(err, RepoError::TransientReference { .. }));
}

#[test]
fn failed_transaction_rolls_back_every_write() {
    let mut fixture = fixture();
    let repo = &fixture.players;
    let result: Result<(), RepoError> = fixture.db.transaction(|scope| {
        repo.save(scope, SoccerPlayer::new("Ghost", 20, 180, 70))?;
        Err(RepoError::InvalidData("abort".to_string()))
    });
    assert!(matches!(result, Err(RepoError::InvalidData(_))));

    let scope = fixture.db.scope().unwrap();
    assert_eq!(fixture.players.count(&scope).unwrap(), 0);
}

#[test]
fn bulk_update_counts_rows_and_clears_scope_cache() {
    let mut fixture = fixture();
    let saved = seed_players(
        &mut fixture,
        vec![
            SoccerPlayer::new("a", 20, 170, 70),
            SoccerPlayer::new("b", 20, 180, 70),
            SoccerPlayer::new("c", 20, 190, 70),
        ],
    );
    let tall_id = saved[2].id.unwrap();

    let scope = fixture.db.scope().unwrap();
    assert_eq!(fixture.players.get_by_id(&scope, tall_id).unwrap().weight, 70);
    assert!(scope.is_cached("SoccerPlayer", &tall_id.into()));

    let updated = fixture.players.bulk_add_weight(&scope, 175, 5).unwrap();
    assert_eq!(updated, 2);
    assert!(!scope.is_cached("SoccerPlayer", &tall_id.into()));
    assert_eq!(fixture.players.get_by_id(&scope, tall_id).unwrap().weight, 75);
    assert_eq!(
        fixture.players.get_by_id(&scope, saved[0].id.unwrap()).unwrap().weight,
        70
    );

    let removed = fixture.players.bulk_delete(&scope, None).unwrap();
    assert_eq!(removed, 3);
    assert_eq!(fixture.players.count(&scope).unwrap(), 0);
}

#[test]
fn bulk_update_rejects_identity_assignment() {
    let mut fixture = fixture();
    let scope = fixture.db.scope().unwrap();
    let err = fixture
        .players
        .bulk_update(&scope, None, repokit_core::Mutation::new().set("id", 7_i64))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidSpecification(_)));
}

#[test]
fn assigned_identity_director_inserts_then_merges() {
    let registry = Arc::new(soccer_registry().unwrap());
    let directors = DirectorRepository::build(Arc::clone(&registry)).unwrap();
    let mut db = Database::open_in_memory(registry, RepositoryConfig::default()).unwrap();

    let scope = db.scope().unwrap();
    let mut director = directors.save(&scope, Director::new("d-1", "Ann")).unwrap();
    assert!(director.meta.audit().created_at().is_some());

    director.name = "Anne".to_string();
    let director = directors.save(&scope, director).unwrap();
    assert_eq!(director.id, "d-1");
    assert_eq!(directors.count(&scope).unwrap(), 1);
    assert_eq!(directors.get_by_id(&scope, "d-1").unwrap().name, "Anne");
    scope.commit().unwrap();
}
