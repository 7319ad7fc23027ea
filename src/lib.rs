//! Core library entrypoint for the Coterie membership core: the lifecycle
//! registry for a replicated node group, the reconciliation queue that
//! settles membership changes as token mints and burns on an external
//! ledger, and the one-shot genesis bootstrap protocol.

pub mod bootstrap;
pub mod identity;
pub mod ledger;
pub mod persistence;
pub mod protocol;
pub mod reconcile;
pub mod registry;
pub mod round;
pub mod wallet;

pub use bootstrap::{BootstrapCoordinator, BootstrapKind, BootstrapOutcome};
pub use identity::{CredentialId, NodeEndpoint};
pub use ledger::{
    generate_software_credential, LedgerError, LedgerGateway, PreparedTxn, SignerCredential,
    TokenRef, TxnHandle, TxnIntent,
};
pub use persistence::{DocumentError, DocumentStore};
pub use protocol::{
    decode_request, encode_response, MemberDescriptor, MembershipAction, OriginNode, ProtocolError,
    UserRequest, UserResponse,
};
pub use reconcile::{
    AdvanceOutcome, OpKind, OpStatus, ReconcileConfig, ReconcileDriver, ReconcileError,
    ReconcileOp, ReconcileQueue, StalePolicy, StalledOperation, StepReport,
};
pub use registry::{MemberRecord, MemberState, MembershipRegistry, RegistryError};
pub use round::{KernelConfig, MembershipKernel, RoundContext, RoundError, RoundReport, UserInput};
pub use wallet::{ClusterWallet, WalletError, WalletIdentity, WalletPaths};
