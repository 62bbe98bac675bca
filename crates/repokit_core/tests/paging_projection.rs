use repokit_core::model::{
    soccer_registry, BodySpec, ExcludeIdDto, ExcludeIdView, NestedClosedProjection, SoccerPlayer,
    Team,
};
use repokit_core::repo::{SoccerPlayerRepository, TeamRepository};
use repokit_core::{Database, PageRequest, ProjectionKind, RepoError, RepositoryConfig, Sort};
use std::sync::Arc;

fn open() -> (Database, SoccerPlayerRepository, TeamRepository) {
    let registry = Arc::new(soccer_registry().unwrap());
    let players = SoccerPlayerRepository::build(Arc::clone(&registry)).unwrap();
    let teams = TeamRepository::build(Arc::clone(&registry)).unwrap();
    let db = Database::open_in_memory(registry, RepositoryConfig::default()).unwrap();
    (db, players, teams)
}

fn seed_five(db: &mut Database, players: &SoccerPlayerRepository) {
    db.transaction(|scope| {
        players.save_all(
            scope,
            (1..=5).map(|n| SoccerPlayer::new(format!("p{n}"), 20 + n, 170 + n, 60 + n)),
        )
    })
    .unwrap();
}

#[test]
fn page_reports_totals_from_a_count_query() {
    let (mut db, players, _) = open();
    seed_five(&mut db, &players);

    let scope = db.scope().unwrap();
    let request = PageRequest::of_sorted(0, 3, Sort::asc("name")).unwrap();
    let before = scope.round_trips();
    let first = players.find_page_by_name_is_not_null(&scope, &request).unwrap();
    assert_eq!(scope.round_trips() - before, 2);

    assert_eq!(first.total_elements(), 5);
    assert_eq!(first.total_pages(), 2);
    assert_eq!(first.number_of_elements(), 3);
    assert!(first.is_first());
    assert!(first.has_next());
    assert!(!first.has_previous());
    let first_names: Vec<_> = first.content().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(first_names, vec!["p1", "p2", "p3"]);

    let second = players
        .find_page_by_name_is_not_null(&scope, &request.next().unwrap())
        .unwrap();
    assert_eq!(second.number(), 1);
    assert_eq!(second.number_of_elements(), 2);
    assert!(second.is_last());
    assert!(!second.has_next());
}

#[test]
fn slice_reads_one_extra_row_without_counting() {
    let (mut db, players, _) = open();
    seed_five(&mut db, &players);

    let scope = db.scope().unwrap();
    let request = PageRequest::of_sorted(0, 3, Sort::asc("name")).unwrap();
    let before = scope.round_trips();
    let first = players.find_slice_by_name_is_not_null(&scope, &request).unwrap();
    assert_eq!(scope.round_trips() - before, 1);
    assert_eq!(first.number_of_elements(), 3);
    assert!(first.has_next());

    let last = players
        .find_slice_by_name_is_not_null(&scope, &request.next().unwrap())
        .unwrap();
    assert_eq!(last.number_of_elements(), 2);
    assert!(!last.has_next());
    assert!(last.has_previous());
}

#[test]
fn page_past_the_end_is_empty_but_keeps_totals() {
    let (mut db, players, _) = open();
    seed_five(&mut db, &players);

    let scope = db.scope().unwrap();
    let page = players
        .find_page(&scope, None, &PageRequest::of(4, 2).unwrap())
        .unwrap();
    assert!(page.content().is_empty());
    assert_eq!(page.total_elements(), 5);
    assert_eq!(page.total_pages(), 3);
}

#[test]
fn zero_page_size_is_rejected() {
    let err = PageRequest::of(0, 0).unwrap_err();
    assert!(matches!(err, RepoError::InvalidPageRequest(_)));
}

#[test]
fn extreme_page_bounds_do_not_overflow() {
    let (mut db, players, _) = open();
    seed_five(&mut db, &players);

    let scope = db.scope().unwrap();
    let everything = players
        .find_slice(&scope, None, &PageRequest::of(0, u64::MAX).unwrap())
        .unwrap();
    assert_eq!(everything.number_of_elements(), 5);
    assert!(!everything.has_next());

    let far = players
        .find_page(&scope, None, &PageRequest::of(u64::MAX, 1).unwrap())
        .unwrap();
    assert!(far.content().is_empty());
    assert_eq!(far.total_elements(), 5);
    assert!(!far.has_next());
    assert!(far.is_last());
}

#[test]
fn page_content_maps_to_value_objects() {
    let (mut db, players, _) = open();
    seed_five(&mut db, &players);

    let scope = db.scope().unwrap();
    let request = PageRequest::of_sorted(0, 2, Sort::desc("height")).unwrap();
    let page = players
        .find_page(&scope, None, &request)
        .unwrap()
        .map(|player| ExcludeIdDto::of(&player));

    assert_eq!(page.total_elements(), 5);
    assert_eq!(
        page.content()[0],
        ExcludeIdDto {
            name: "p5".to_string(),
            height: 175,
            weight: 65,
        }
    );
}

#[test]
fn closed_open_and_dto_projections_shape_the_same_rows() {
    let (mut db, players, _) = open();
    db.transaction(|scope| players.save(scope, SoccerPlayer::new("Kane", 30, 188, 86)))
        .unwrap();

    let scope = db.scope().unwrap();
    let closed = players
        .find_projection_by_name::<ExcludeIdView>(&scope, "Kane")
        .unwrap();
    assert_eq!(
        closed,
        vec![ExcludeIdView {
            name: "Kane".to_string(),
            height: 188,
            weight: 86,
        }]
    );

    let open = players.find_projection_by_name::<BodySpec>(&scope, "Kane").unwrap();
    assert_eq!(open[0].body_spec, "height: 188, weight: 86");

    let dto = players.find_projection_by_name::<ExcludeIdDto>(&scope, "Kane").unwrap();
    assert_eq!(dto[0].name, "Kane");
    assert_eq!(players.find_dto_all(&scope).unwrap(), dto);
}

#[test]
fn nested_projection_tolerates_missing_team() {
    let (mut db, players, teams) = open();
    db.transaction(|scope| {
        let team = teams.save(scope, Team::new("Spurs"))?;
        players.save(scope, SoccerPlayer::new("Son", 31, 183, 77).on_team(&team))?;
        players.save(scope, SoccerPlayer::new("Free", 25, 180, 75))
    })
    .unwrap();

    let scope = db.scope().unwrap();
    let with_team = players
        .find_projection_by_name::<NestedClosedProjection>(&scope, "Son")
        .unwrap();
    assert_eq!(with_team[0].team.name.as_deref(), Some("Spurs"));

    let without_team = players
        .find_projection_by_name::<NestedClosedProjection>(&scope, "Free")
        .unwrap();
    assert_eq!(without_team[0].name, "Free");
    assert_eq!(without_team[0].team.name, None);
}

#[test]
fn dynamic_projection_picks_shape_by_token() {
    let (mut db, players, _) = open();
    db.transaction(|scope| players.save(scope, SoccerPlayer::new("Kane", 30, 188, 86)))
        .unwrap();

    let scope = db.scope().unwrap();
    let views = players
        .find_projected_by_name(&scope, "Kane", "ExcludeIdView")
        .unwrap();
    assert_eq!(views[0].kind(), ProjectionKind::Closed);
    let view = views.into_iter().next().unwrap().into_view().unwrap();
    assert_eq!(view.text("name").unwrap(), "Kane");
    assert!(!view.contains("id"));

    let entities = players
        .find_projected_by_name(&scope, "Kane", "SoccerPlayer")
        .unwrap();
    let record = entities.into_iter().next().unwrap().into_record().unwrap();
    assert_eq!(record.entity(), "SoccerPlayer");

    let err = players
        .find_projected_by_name(&scope, "Kane", "ShoeSizeView")
        .unwrap_err();
    assert!(matches!(err, RepoError::UnsupportedProjection { .. }));
}

#[test]
fn registered_tokens_include_the_entity_itself() {
    let (_, players, _) = open();
    let tokens: Vec<_> = players.projections().tokens("SoccerPlayer").collect();
    for token in [
        "SoccerPlayer",
        "ExcludeIdView",
        "BodySpec",
        "ExcludeIdDto",
        "NestedClosedProjection",
    ] {
        assert!(tokens.contains(&token), "missing {token}");
    }
}
