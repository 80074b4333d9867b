use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    comments::repo_types::{Comment, COMMENTS},
    memes::repo_types::{Meme, MEMES},
    store::{memory::MemoryCollection, postgres::PgCollection, Collection, Model, Schema},
    users::repo_types::{active_scope, User, USERS},
};

/// The three collections the API works on.
#[derive(Clone)]
pub struct Store {
    pub users: Model<User>,
    pub memes: Model<Meme>,
    pub comments: Model<Comment>,
}

impl Store {
    fn build(open: impl Fn(&'static Schema) -> Arc<dyn Collection>) -> Self {
        Self {
            users: Model::new(open(&USERS)).with_scope(active_scope()),
            memes: Model::new(open(&MEMES)),
            comments: Model::new(open(&COMMENTS)),
        }
    }

    pub fn memory() -> Self {
        Self::build(|schema| Arc::new(MemoryCollection::new(schema)))
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self::build(move |schema| Arc::new(PgCollection::new(pool.clone(), schema)))
    }

    /// `memory://` keeps everything in process; anything else is a Postgres URL.
    /// Migrations run on connect.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        if database_url.starts_with("memory:") {
            info!("using in-memory document store");
            return Ok(Self::memory());
        }
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("run migrations")?;
        Ok(Self::postgres(pool))
    }
}
