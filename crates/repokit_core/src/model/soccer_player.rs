use crate::entity::{Association, Collection, Entity};
use crate::error::RepoResult;
use crate::model::team::Team;
use crate::record::{EntityMeta, Record, Value};
use crate::registry::{AttributeKind, AuditMode, EntityDescriptor};

/// A player, optionally on a team. Fully audited.
#[derive(Debug, Clone, PartialEq)]
pub struct SoccerPlayer {
    pub id: Option<i64>,
    pub name: String,
    pub age: i64,
    pub height: i64,
    pub weight: i64,
    pub team: Association<Team>,
    pub meta: EntityMeta,
}

impl SoccerPlayer {
    pub fn new(name: impl Into<String>, age: i64, height: i64, weight: i64) -> Self {
        Self {
            id: None,
            name: name.into(),
            age,
            height,
            weight,
            team: Association::Absent,
            meta: EntityMeta::default(),
        }
    }

    pub fn on_team(mut self, team: &Team) -> Self {
        self.change_team(team);
        self
    }

    /// Points the player at `team`. The team's loaded roster, if any, gains
    /// the player only after a reload; the inverse side is never written.
    pub fn change_team(&mut self, team: &Team) {
        let mut team = team.clone();
        team.soccer_players = Collection::Unset;
        self.team = Association::loaded(team);
    }
}

impl Entity for SoccerPlayer {
    const NAME: &'static str = "SoccerPlayer";

    fn descriptor() -> RepoResult<EntityDescriptor> {
        EntityDescriptor::builder(Self::NAME, "soccer_player")
            .generated_id("id", "soccer_player_id")
            .attribute("name", AttributeKind::Text)
            .attribute("age", AttributeKind::Integer)
            .attribute("height", AttributeKind::Integer)
            .attribute("weight", AttributeKind::Integer)
            .many_to_one("team", Team::NAME, "team_id")
            .audited(AuditMode::Full)
            .build()
    }

    fn identity(&self) -> Value {
        self.id.into()
    }

    fn to_record(&self) -> Record {
        Record::new(Self::NAME, self.id)
            .with("name", self.name.as_str())
            .with("age", self.age)
            .with("height", self.height)
            .with("weight", self.weight)
            .with_link("team", self.team.to_link())
            .with_meta(self.meta.clone())
    }

    fn from_record(record: Record) -> RepoResult<Self> {
        Ok(Self {
            id: record.identity().as_i64(),
            name: record.text("name")?,
            age: record.integer("age")?,
            height: record.integer("height")?,
            weight: record.integer("weight")?,
            team: Association::from_link(record.link("team"))?,
            meta: record.meta().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::SoccerPlayer;
    use crate::entity::Entity;
    use crate::model::Team;
    use crate::record::{Link, Value};

    #[test]
    fn record_round_trip_keeps_persisted_fields() {
        let mut team = Team::new("TeamA");
        team.id = Some(3);
        let player = SoccerPlayer::new("Roy", 30, 173, 73).on_team(&team);

        let record = player.to_record();
        assert_eq!(record.identity(), &Value::Null);
        assert!(matches!(record.link("team"), Some(Link::Loaded(_))));

        let restored = SoccerPlayer::from_record(record).expect("from record");
        assert_eq!(restored, player);
        assert_eq!(restored.team.identity(), Some(Value::Integer(3)));
    }
}
