//! # docbatch
//!
//! Token-bounded document chunking and asynchronous batch-inference
//! orchestration for project portfolio analysis.
//!
//! docbatch takes the normalized text of heterogeneous project documents
//! (audit reports, operating regulations, disbursement schedules), cuts
//! it into token-budgeted chunks with inter-chunk overlap, builds one
//! addressable batch of extraction requests per project, drives the
//! provider's asynchronous batch job to completion, and reconciles the
//! JSONL results back to exact (document, category, chunk) coordinates.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌───────────┐   ┌────────────┐
//! │ extracted/│──▶│ chunker  │──▶│ request    │──▶│ batch job  │
//! │ documents │   │ + store  │   │ builder    │   │ (provider) │
//! └───────────┘   └──────────┘   └───────────┘   └─────┬──────┘
//!                                                      │ poll tick
//!                                                      ▼
//!                                   ┌───────────┐   ┌───────────┐
//!                                   │ results/  │◀──│ reconcile │
//!                                   │ {category}│   │ by address│
//!                                   └───────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docbatch process --project CFA009660 --dry-run   # chunk + count requests
//! docbatch process --project CFA009660             # chunk + submit batch
//! docbatch poll                                    # advance all jobs one tick
//! docbatch jobs --project CFA009660                # list known jobs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`tokens`] | Deterministic token counting |
//! | [`chunker`] | Boundary-aware chunking with overlap |
//! | [`categories`] | Category routing and prompts |
//! | [`address`] | Lossless request addressing |
//! | [`request`] | Batch request assembly |
//! | [`store`] | Object store trait + filesystem backend |
//! | [`store_s3`] | S3 backend (SigV4) |
//! | [`batch_api`] | Batch inference service client |
//! | [`orchestrator`] | Job submission guard and poll tick |
//! | [`reconcile`] | Tolerant result reconciliation |
//! | [`pipeline`] | Trigger handling and the process flow |
//! | [`notify`] | Failure notification boundary |

pub mod address;
pub mod batch_api;
pub mod categories;
pub mod chunker;
pub mod config;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod reconcile;
pub mod request;
pub mod store;
pub mod store_s3;
pub mod tokens;
