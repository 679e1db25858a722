pub mod candidates;
pub mod crawler;
pub mod handler;
pub mod routing;
pub mod searcher;
pub mod state;

pub use candidates::CandidatePool;
pub use crawler::{CrawlerHandle, DhtCrawler};
pub use handler::{DhtHandler, NoopHandler};
pub use routing::{k_closest, AddOutcome, RoutingTable};
pub use searcher::{SearchUpdate, Searchers};
pub use state::{DhtState, Event, Step};
