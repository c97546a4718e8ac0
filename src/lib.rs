//! # swRust - consensus-driven connectivity for robot swarms
//!
//! Every robot in the swarm runs a small blockchain node. Robots greet the
//! neighbours they meet by sending `Hello` transactions and report their
//! node peers with `AddPeer` transactions. A smart contract carried in every
//! block turns that interaction history into connectivity scores or lottery
//! tickets, which in turn decide whose blocks weigh more.
//!
//! ## Core Components
//!
//! - **InteractionLedger**: append-only record of greetings and peer reports
//! - **Estimator**: per-strategy score and ticket updates over a decay window
//! - **Contract**: the block state; applies transactions and pays block rewards
//! - **PeeringController**: keeps the node's peer table in line with radio neighbours
//! - **ExperimentFsm**: IDLE -> RANDOM -> TRANSACT greeting loop
//! - **RobotController**: one robot's node, clocks and state machine
//!
//! ## Driving a robot
//!
//! The library does not move robots or carry radio traffic. A host (the
//! `swarm_sim` binary in `simulator/`) does that and calls into the
//! controller once per tick:
//!
//! ```no_run
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use sw_rust::{ContractParams, NodeConfig, PeeringConfig, RobotController, ToyNode};
//!
//! let params = ContractParams::new("hello_index", 50, 1, 10);
//! let node = ToyNode::new(1, NodeConfig::default(), &params);
//! let mut robot = RobotController::new(1, node, PeeringConfig::default());
//! let mut rng = StdRng::seed_from_u64(1);
//!
//! for now in 0..100 {
//!     // beacons of robots in radio range go here
//!     robot.control_step(now, &[], &mut rng).unwrap();
//! }
//! ```

// Contract layer
pub mod sw_contract;
pub mod sw_estimator;
pub mod sw_ledger;

// Robot side
pub mod sw_fsm;
pub mod sw_peering;
pub mod sw_robot;
pub mod sw_timer;

// Node and plumbing
pub mod sw_enode;
pub mod sw_interface;
pub mod sw_logs;
pub mod sw_node;

// Re-export commonly used types
pub use sw_contract::{Contract, ContractParams};
pub use sw_enode::{enode_to_id, gen_enode};
pub use sw_estimator::{Lottery, UpdateStrategy};
pub use sw_fsm::{ExperimentFsm, ExperimentState};
pub use sw_interface::{
    Block, BlockSelector, ChainNode, Enode, NodeError, RadioBeacon, RobotId, SimTime,
    Transaction, TxCall,
};
pub use sw_ledger::InteractionLedger;
pub use sw_node::{ConsensusKind, NodeConfig, ToyNode};
pub use sw_peering::{PeeringConfig, PeeringController};
pub use sw_robot::RobotController;
