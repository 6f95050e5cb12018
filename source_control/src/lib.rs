use std::future::Future;

pub mod git;

/// Access to the repositories hosted by the platform.
pub trait SourceControl {
    type Repository: SourceRepository + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn get_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> impl Future<Output = Result<Self::Repository, Self::Error>> + Send;
}

/// Read-only view of a single repository.
pub trait SourceRepository {
    type Error: std::error::Error + Send + Sync + 'static;

    /// `None` when the file does not exist at that commit.
    fn read_file_contents(
        &self,
        commit: &str,
        path: &str,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send;

    /// Full commit id of the head of `branch`.
    fn resolve_branch(
        &self,
        branch: &str,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send;

    /// Full commit id for an abbreviated or full commit id.
    fn resolve_commit(
        &self,
        commit: &str,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send;

    fn default_branch(&self) -> impl Future<Output = Result<String, Self::Error>> + Send;

    /// Uncompressed tar archive of the tree at `commit`.
    fn archive(&self, commit: &str) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send;
}
