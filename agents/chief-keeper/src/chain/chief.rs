#![allow(missing_docs)]

use ethers::contract::abigen;

// The subset of DSChief the keeper reads from and calls into.
abigen!(
    DsChief,
    r#"[
        function hat() external view returns (address)
        function approvals(address) external view returns (uint256)
        function slates(bytes32, uint256) external view returns (address)
        function MAX_YAYS() external view returns (uint256)
        function lift(address whom) external
        event Etch(bytes32 indexed slate)
    ]"#
);
