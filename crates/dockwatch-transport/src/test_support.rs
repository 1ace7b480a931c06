//! Engine with nothing in it.

use async_trait::async_trait;
use dockwatch_engine::{
    Action, Engine, EngineError, EngineInfo, LineStream, LogOptions, ProcessTable, Resource,
    ResourceKind, UsageSample,
};
use dockwatch_tty::{Attached, ShellCommand, Tty};
use serde_json::Value;

#[derive(Default)]
pub struct StaticEngine;

fn unsupported(kind: ResourceKind, action: &str) -> EngineError {
    EngineError::Unsupported {
        kind,
        action: action.to_string(),
    }
}

#[async_trait]
impl Engine for StaticEngine {
    async fn list(&self, _kind: ResourceKind) -> Result<Vec<Resource>, EngineError> {
        Ok(Vec::new())
    }

    async fn act(&self, kind: ResourceKind, _id: &str, action: Action) -> Result<(), EngineError> {
        Err(unsupported(kind, &action.to_string()))
    }

    async fn prune(&self, _kind: ResourceKind) -> Result<(), EngineError> {
        Ok(())
    }

    async fn inspect(&self, kind: ResourceKind, _id: &str) -> Result<Value, EngineError> {
        Err(unsupported(kind, "inspect"))
    }

    async fn state(&self, _id: &str) -> Result<String, EngineError> {
        Ok("running".into())
    }

    async fn stats(&self, _id: &str) -> Result<UsageSample, EngineError> {
        Ok(UsageSample::default())
    }

    async fn logs(
        &self,
        kind: ResourceKind,
        _id: &str,
        _options: &LogOptions,
    ) -> Result<LineStream, EngineError> {
        Err(unsupported(kind, "logs"))
    }

    async fn rename(&self, _id: &str, _name: &str) -> Result<(), EngineError> {
        Err(unsupported(ResourceKind::Container, "rename"))
    }

    async fn top(&self, _id: &str) -> Result<ProcessTable, EngineError> {
        Err(unsupported(ResourceKind::Container, "top"))
    }

    async fn pull(&self, _image: &str) -> Result<LineStream, EngineError> {
        Err(unsupported(ResourceKind::Image, "pull"))
    }

    async fn shell(
        &self,
        _id: &str,
        _shell: &ShellCommand,
        _tty: &Tty,
    ) -> Result<Attached, EngineError> {
        Err(unsupported(ResourceKind::Container, "shell"))
    }

    async fn info(&self) -> Result<EngineInfo, EngineError> {
        Ok(EngineInfo {
            version: "27.0.1".into(),
            host: "local".into(),
            cpus: 1,
            memory: 0,
        })
    }
}
