//! Scope each message is processed in.
//!
//! A unit of work is started before a message is handed to its processor,
//! committed when processing succeeds and rolled back when it fails.

use std::future::Future;

use sqlx::{PgPool, Postgres, Transaction};

use hare_common::error::Result;

pub trait UnitOfWork: Send + Sync {
    type Handle: Send;

    fn begin(&self) -> impl Future<Output = Result<Self::Handle>>;

    fn commit(&self, handle: Self::Handle) -> impl Future<Output = Result<()>>;

    fn rollback(&self, handle: Self::Handle) -> impl Future<Output = Result<()>>;
}

/// One PostgreSQL transaction per message.
impl UnitOfWork for PgPool {
    type Handle = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Handle> {
        Ok(sqlx::Pool::begin(self).await?)
    }

    async fn commit(&self, handle: Self::Handle) -> Result<()> {
        handle.commit().await?;
        Ok(())
    }

    async fn rollback(&self, handle: Self::Handle) -> Result<()> {
        handle.rollback().await?;
        Ok(())
    }
}

/// Processing without any surrounding transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransaction;

impl UnitOfWork for NoTransaction {
    type Handle = ();

    async fn begin(&self) -> Result<()> {
        Ok(())
    }

    async fn commit(&self, _handle: ()) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self, _handle: ()) -> Result<()> {
        Ok(())
    }
}
