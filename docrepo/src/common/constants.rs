// document constants
pub const DOC_ID: &str = "_id";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

// operator constants
pub const OPERATOR_SIGIL: char = '$';
pub const SET_OPERATOR: &str = "$set";

// index constants
pub const ID_INDEX_NAME: &str = "_id_";
pub const INDEX_VERSION: i32 = 2;

// connection constants
pub const SRV_SCHEME_MARKER: &str = "mongodb+srv";

// transaction constants
pub const TRANSACTION_RETRY_BUDGET_SECS: u64 = 120;
