use crate::entity::{Collection, Entity};
use crate::error::RepoResult;
use crate::model::soccer_player::SoccerPlayer;
use crate::record::{EntityMeta, Record, Value};
use crate::registry::{AttributeKind, EntityDescriptor};

/// A team. Versioned, so concurrent edits surface as optimistic conflicts.
#[derive(Debug, Clone, PartialEq)]
pub struct Team {
    pub id: Option<i64>,
    pub name: String,
    /// Inverse side of `SoccerPlayer.team`.
    pub soccer_players: Collection<SoccerPlayer>,
    pub meta: EntityMeta,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            soccer_players: Collection::Unset,
            meta: EntityMeta::default(),
        }
    }
}

impl Entity for Team {
    const NAME: &'static str = "Team";

    fn descriptor() -> RepoResult<EntityDescriptor> {
        EntityDescriptor::builder(Self::NAME, "team")
            .generated_id("id", "team_id")
            .attribute("name", AttributeKind::Text)
            .one_to_many("soccer_players", SoccerPlayer::NAME, "team")
            .versioned()
            .build()
    }

    fn identity(&self) -> Value {
        self.id.into()
    }

    fn to_record(&self) -> Record {
        Record::new(Self::NAME, self.id)
            .with("name", self.name.as_str())
            .with_link("soccer_players", self.soccer_players.to_link())
            .with_meta(self.meta.clone())
    }

    fn from_record(record: Record) -> RepoResult<Self> {
        Ok(Self {
            id: record.identity().as_i64(),
            name: record.text("name")?,
            soccer_players: Collection::from_link(record.link("soccer_players"))?,
            meta: record.meta().clone(),
        })
    }
}
