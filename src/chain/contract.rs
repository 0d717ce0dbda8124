//! ABI binding for the dice/odds contract.
//!
//! Declared from an inline human-readable ABI rather than a build-time
//! artifact file, since this service only needs the four members named in
//! spec.md §6: the two events it subscribes to and the two methods it
//! calls (`settleBet`, `revealDelay`; `playerBets` is used to cross-check
//! the locally computed reveal block per spec.md §9).

use ethers::contract::abigen;

abigen!(
    DiceContract,
    r#"[
        event BetPlaced(uint32 indexed roomId, address indexed player, uint256 amountWei, bool betBig, uint64 commitBlock, uint64 revealBlock)
        event BetSettled(uint32 indexed roomId, address indexed player, uint256 amountWei, bool won, uint8 hashValue, bytes32 blockHash, uint256 betId)
        function settleBet(uint32 roomId, address player) external
        function revealDelay() external view returns (uint64)
        function playerBets(uint32 roomId, address player) external view returns (uint256 amountWei, bool betBig, uint64 commitBlock, uint64 revealBlock, bool settled)
    ]"#,
);
