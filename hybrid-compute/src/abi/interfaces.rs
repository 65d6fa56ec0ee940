//! Solidity ABI surface the pipeline talks to: the Hybrid Compute helper, the system account,
//! and the EntryPoint v0.6 simulation entry points.

use alloy_sol_types::sol;

sol! {
    /// Revert raised by the helper when an account asks for an off-chain result that is not cached.
    #[derive(Debug, PartialEq, Eq)]
    error HybridComputeRequired(address account, bytes32 requestId, bytes callParams);

    /// Raised by `PutResponse` when the request id already has a cache entry.
    #[derive(Debug, PartialEq, Eq)]
    error DuplicateEntry(bytes32 requestId);

    /// EntryPoint v0.6 user operation.
    #[derive(Debug, PartialEq, Eq)]
    struct UserOperation {
        address sender;
        uint256 nonce;
        bytes initCode;
        bytes callData;
        uint256 callGasLimit;
        uint256 verificationGasLimit;
        uint256 preVerificationGas;
        uint256 maxFeePerGas;
        uint256 maxPriorityFeePerGas;
        bytes paymasterAndData;
        bytes signature;
    }

    interface IHCHelper {
        function RegisterUrl(address account, string url) external;
        function RegisteredCallers(address account)
            external
            view
            returns (address signer, string url, uint256 credits);
        function PutResponse(bytes32 requestId, bytes payload, bytes signature) external;
        function GetResponse(bytes32 requestId) external returns (bytes payload);
    }

    interface ISimpleAccount {
        function execute(address dest, uint256 value, bytes func) external;
    }

    interface IEntryPoint {
        error ExecutionResult(
            uint256 preOpGas,
            uint256 paid,
            uint48 validAfter,
            uint48 validUntil,
            bool targetSuccess,
            bytes targetResult
        );
        error FailedOp(uint256 opIndex, string reason);

        function simulateHandleOp(UserOperation op, address target, bytes targetCallData) external;
        function getNonce(address sender, uint192 key) external view returns (uint256 nonce);
    }
}
