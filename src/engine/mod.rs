// Copyright © 2024 Pathway

pub mod error;
pub use self::error::{DynError, DynResult, Error, Result};

pub mod value;
pub use self::value::Value;

pub mod dtype;
pub use self::dtype::{DType, DTypeRegistry, DTypeTranslator, Dimension, NumpyTranslator, Shape};

pub mod table;
pub use self::table::{Column, Table};

pub mod schema;
pub use self::schema::{ColumnSchema, Properties, Schema, Tag};

pub mod selector;
pub use self::selector::ColumnSelector;

pub mod operator;
pub use self::operator::{ColumnMapping, Dependency, FitStats, Operator, StatOperator, Supports};

pub mod operators;

pub mod graph;
pub use self::graph::{FitState, Graph, Node, NodeHandle};

pub mod executor;
pub use self::executor::{DtypeCapture, LocalExecutor, Target, TransformOptions};

pub mod session;
pub use self::session::{RayonSession, Session, SynchronousSession};

pub mod distributed;
pub use self::distributed::{DistributedExecutor, PartitionedTable, TableMeta};

pub mod config;
pub use self::config::Config;

pub mod worker;
